//! S7风格PLC地址解析
//!
//! 支持的地址形式：
//! - `DB{n}.DBX{offset}.{bit}` 位地址（布尔信号）
//! - `DB{n}.DBW{offset}` 16位字地址（大端）
//! - `DB{n}.DBD{offset}` 32位双字地址（大端）

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 地址区域类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressArea {
    /// 位地址（DBX）
    Bit,
    /// 字地址（DBW，16位大端）
    Word,
    /// 双字地址（DBD，32位大端）
    DoubleWord,
}

/// 解析后的PLC地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlcAddress {
    /// 数据块号
    pub db: u16,
    /// 区域类型
    pub area: AddressArea,
    /// 字节偏移量
    pub offset: u16,
    /// 位号（仅位地址有效，0-7）
    pub bit: Option<u8>,
}

impl Display for PlcAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.area {
            AddressArea::Bit => write!(
                f,
                "DB{}.DBX{}.{}",
                self.db,
                self.offset,
                self.bit.unwrap_or(0)
            ),
            AddressArea::Word => write!(f, "DB{}.DBW{}", self.db, self.offset),
            AddressArea::DoubleWord => write!(f, "DB{}.DBD{}", self.db, self.offset),
        }
    }
}

impl FromStr for PlcAddress {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}

/// 解析完整的数据块地址
pub fn parse_address(address: &str) -> AppResult<PlcAddress> {
    if address.is_empty() {
        return Err(AppError::invalid_address(address, "地址不能为空"));
    }

    let mut parts = address.split('.');
    let db_part = parts
        .next()
        .ok_or_else(|| AppError::invalid_address(address, "缺少数据块段"))?;
    let db = db_part
        .strip_prefix("DB")
        .and_then(|n| n.parse::<u16>().ok())
        .ok_or_else(|| AppError::invalid_address(address, "数据块段必须为 DB{n} 形式"))?;
    if db == 0 {
        return Err(AppError::invalid_address(address, "数据块号必须大于0"));
    }

    let area_part = parts
        .next()
        .ok_or_else(|| AppError::invalid_address(address, "缺少区域段"))?;

    let (area, offset) = if let Some(off) = area_part.strip_prefix("DBX") {
        (AddressArea::Bit, off)
    } else if let Some(off) = area_part.strip_prefix("DBW") {
        (AddressArea::Word, off)
    } else if let Some(off) = area_part.strip_prefix("DBD") {
        (AddressArea::DoubleWord, off)
    } else {
        return Err(AppError::invalid_address(
            address,
            "区域段必须为 DBX/DBW/DBD 之一",
        ));
    };
    let offset = offset
        .parse::<u16>()
        .map_err(|_| AppError::invalid_address(address, "偏移量必须为非负整数"))?;

    let bit = match area {
        AddressArea::Bit => {
            let bit_part = parts
                .next()
                .ok_or_else(|| AppError::invalid_address(address, "位地址缺少位号段"))?;
            let bit = bit_part
                .parse::<u8>()
                .map_err(|_| AppError::invalid_address(address, "位号必须为整数"))?;
            if bit > 7 {
                return Err(AppError::invalid_address(address, "位号必须在0-7范围内"));
            }
            Some(bit)
        }
        _ => None,
    };

    if parts.next().is_some() {
        return Err(AppError::invalid_address(address, "地址包含多余的段"));
    }

    Ok(PlcAddress {
        db,
        area,
        offset,
        bit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试三种地址形式的解析
    #[test]
    fn test_parse_address_forms() {
        let bit = parse_address("DB12.DBX52.3").unwrap();
        assert_eq!(bit.db, 12);
        assert_eq!(bit.area, AddressArea::Bit);
        assert_eq!(bit.offset, 52);
        assert_eq!(bit.bit, Some(3));

        let word = parse_address("DB3.DBW50").unwrap();
        assert_eq!(word.area, AddressArea::Word);
        assert_eq!(word.offset, 50);
        assert_eq!(word.bit, None);

        let dword = parse_address("DB1.DBD8").unwrap();
        assert_eq!(dword.area, AddressArea::DoubleWord);
        assert_eq!(dword.offset, 8);
    }

    /// 测试非法地址的拒绝
    #[test]
    fn test_parse_address_rejects_invalid() {
        assert!(parse_address("").is_err());
        assert!(parse_address("MW100").is_err());
        assert!(parse_address("DB0.DBW2").is_err());
        assert!(parse_address("DB1.DBQ2").is_err());
        assert!(parse_address("DB1.DBX2").is_err());
        assert!(parse_address("DB1.DBX2.9").is_err());
        assert!(parse_address("DB1.DBW2.1").is_err());
    }

    /// 测试解析与渲染的往返一致性
    #[test]
    fn test_address_display_round_trip() {
        for s in ["DB5.DBX0.7", "DB5.DBW30", "DB5.DBD104"] {
            let parsed = parse_address(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }
}
