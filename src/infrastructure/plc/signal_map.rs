//! 信号地址模板与解析器
//!
//! 模板中的每个信号只持有不含数据块前缀的偏移地址（如 `DBX52.0`、`DBW50`），
//! 与工位的数据块号绑定后得到完整地址（如 `DB3.DBX52.0`）。
//! 绑定后的信号表在工位生命周期内不可变。

use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// 条码寄存器数量
/// 条码固定为10个单字符寄存器
pub const BARCODE_REGISTER_COUNT: usize = 10;

/// 信号地址模板
/// 持有所有逻辑信号的偏移地址，不含数据块前缀
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMapTemplate {
    /// 入库触发
    pub inbound_trigger: String,
    /// 出库触发
    pub outbound_trigger: String,
    /// 移库触发
    pub transfer_trigger: String,
    /// 盘点触发
    pub pallet_check_trigger: String,
    /// 启动流程标志
    pub start_process: String,
    /// 入库完成
    pub inbound_completed: String,
    /// 出库完成
    pub outbound_completed: String,
    /// 移库完成
    pub transfer_completed: String,
    /// 盘点完成
    pub pallet_check_completed: String,
    /// 任务失败标志
    pub command_failed: String,
    /// 报警标志
    pub error_alarm: String,
    /// 错误代码寄存器
    pub error_code: String,
    /// 源库位楼层
    pub source_floor: String,
    /// 源库位巷道
    pub source_rail: String,
    /// 源库位货格
    pub source_block: String,
    /// 源库位深度
    pub source_depth: String,
    /// 目标库位楼层
    pub dest_floor: String,
    /// 目标库位巷道
    pub dest_rail: String,
    /// 目标库位货格
    pub dest_block: String,
    /// 目标库位深度
    pub dest_depth: String,
    /// 出入口编号寄存器
    pub gate_number: String,
    /// 进入方向标志
    pub enter_direction: String,
    /// 离开方向标志
    pub exit_direction: String,
    /// 条码单字符寄存器（10个）
    pub barcode_chars: Vec<String>,
    /// 条码有效标志
    pub barcode_valid: String,
    /// 条码无效标志
    pub barcode_invalid: String,
    /// 盘点结果：托盘存在
    pub available_pallet: String,
    /// 盘点结果：托盘不存在
    pub unavailable_pallet: String,
    /// 当前位置楼层
    pub position_floor: String,
    /// 当前位置巷道
    pub position_rail: String,
    /// 当前位置货格
    pub position_block: String,
    /// 当前位置深度
    pub position_depth: String,
}

impl Default for SignalMapTemplate {
    fn default() -> Self {
        Self {
            inbound_trigger: "DBX0.0".to_string(),
            outbound_trigger: "DBX0.1".to_string(),
            transfer_trigger: "DBX0.2".to_string(),
            pallet_check_trigger: "DBX0.3".to_string(),
            start_process: "DBX0.4".to_string(),
            inbound_completed: "DBX2.0".to_string(),
            outbound_completed: "DBX2.1".to_string(),
            transfer_completed: "DBX2.2".to_string(),
            pallet_check_completed: "DBX2.3".to_string(),
            command_failed: "DBX2.4".to_string(),
            error_alarm: "DBX2.5".to_string(),
            error_code: "DBW4".to_string(),
            source_floor: "DBW6".to_string(),
            source_rail: "DBW8".to_string(),
            source_block: "DBW10".to_string(),
            source_depth: "DBW12".to_string(),
            dest_floor: "DBW14".to_string(),
            dest_rail: "DBW16".to_string(),
            dest_block: "DBW18".to_string(),
            dest_depth: "DBW20".to_string(),
            gate_number: "DBW22".to_string(),
            enter_direction: "DBX24.0".to_string(),
            exit_direction: "DBX24.1".to_string(),
            barcode_chars: (0..BARCODE_REGISTER_COUNT)
                .map(|i| format!("DBW{}", 30 + i * 2))
                .collect(),
            barcode_valid: "DBX50.0".to_string(),
            barcode_invalid: "DBX50.1".to_string(),
            available_pallet: "DBX52.0".to_string(),
            unavailable_pallet: "DBX52.1".to_string(),
            position_floor: "DBW60".to_string(),
            position_rail: "DBW62".to_string(),
            position_block: "DBW64".to_string(),
            position_depth: "DBW66".to_string(),
        }
    }
}

impl SignalMapTemplate {
    /// 遍历模板中的所有信号地址
    fn all_addresses(&self) -> Vec<&str> {
        let mut addresses = vec![
            self.inbound_trigger.as_str(),
            self.outbound_trigger.as_str(),
            self.transfer_trigger.as_str(),
            self.pallet_check_trigger.as_str(),
            self.start_process.as_str(),
            self.inbound_completed.as_str(),
            self.outbound_completed.as_str(),
            self.transfer_completed.as_str(),
            self.pallet_check_completed.as_str(),
            self.command_failed.as_str(),
            self.error_alarm.as_str(),
            self.error_code.as_str(),
            self.source_floor.as_str(),
            self.source_rail.as_str(),
            self.source_block.as_str(),
            self.source_depth.as_str(),
            self.dest_floor.as_str(),
            self.dest_rail.as_str(),
            self.dest_block.as_str(),
            self.dest_depth.as_str(),
            self.gate_number.as_str(),
            self.enter_direction.as_str(),
            self.exit_direction.as_str(),
            self.barcode_valid.as_str(),
            self.barcode_invalid.as_str(),
            self.available_pallet.as_str(),
            self.unavailable_pallet.as_str(),
            self.position_floor.as_str(),
            self.position_rail.as_str(),
            self.position_block.as_str(),
            self.position_depth.as_str(),
        ];
        addresses.extend(self.barcode_chars.iter().map(|a| a.as_str()));
        addresses
    }

    /// 验证模板中的所有地址
    /// 拒绝空地址和不以 DB 开头的地址
    pub fn validate(&self) -> AppResult<()> {
        if self.barcode_chars.len() != BARCODE_REGISTER_COUNT {
            return Err(AppError::configuration_error(format!(
                "条码寄存器数量必须为{}，实际为{}",
                BARCODE_REGISTER_COUNT,
                self.barcode_chars.len()
            )));
        }
        for address in self.all_addresses() {
            if address.is_empty() {
                return Err(AppError::configuration_error("信号地址不能为空"));
            }
            if !address.starts_with("DB") {
                return Err(AppError::configuration_error(format!(
                    "信号地址必须以 DB 开头: {}",
                    address
                )));
            }
        }
        Ok(())
    }

    /// 与数据块号绑定，生成完整地址的信号表
    pub fn bind(&self, db_number: u16) -> AppResult<SignalMap> {
        if db_number == 0 {
            return Err(AppError::configuration_error("数据块号必须大于0"));
        }
        self.validate()?;
        let qualify = |address: &str| format!("DB{}.{}", db_number, address);
        Ok(SignalMap {
            db_number,
            inbound_trigger: qualify(&self.inbound_trigger),
            outbound_trigger: qualify(&self.outbound_trigger),
            transfer_trigger: qualify(&self.transfer_trigger),
            pallet_check_trigger: qualify(&self.pallet_check_trigger),
            start_process: qualify(&self.start_process),
            inbound_completed: qualify(&self.inbound_completed),
            outbound_completed: qualify(&self.outbound_completed),
            transfer_completed: qualify(&self.transfer_completed),
            pallet_check_completed: qualify(&self.pallet_check_completed),
            command_failed: qualify(&self.command_failed),
            error_alarm: qualify(&self.error_alarm),
            error_code: qualify(&self.error_code),
            source_floor: qualify(&self.source_floor),
            source_rail: qualify(&self.source_rail),
            source_block: qualify(&self.source_block),
            source_depth: qualify(&self.source_depth),
            dest_floor: qualify(&self.dest_floor),
            dest_rail: qualify(&self.dest_rail),
            dest_block: qualify(&self.dest_block),
            dest_depth: qualify(&self.dest_depth),
            gate_number: qualify(&self.gate_number),
            enter_direction: qualify(&self.enter_direction),
            exit_direction: qualify(&self.exit_direction),
            barcode_chars: self.barcode_chars.iter().map(|a| qualify(a)).collect(),
            barcode_valid: qualify(&self.barcode_valid),
            barcode_invalid: qualify(&self.barcode_invalid),
            available_pallet: qualify(&self.available_pallet),
            unavailable_pallet: qualify(&self.unavailable_pallet),
            position_floor: qualify(&self.position_floor),
            position_rail: qualify(&self.position_rail),
            position_block: qualify(&self.position_block),
            position_depth: qualify(&self.position_depth),
        })
    }
}

/// 绑定后的信号表
/// 每个逻辑信号对应一个完整的数据块地址，绑定后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMap {
    /// 绑定的数据块号
    pub db_number: u16,
    pub inbound_trigger: String,
    pub outbound_trigger: String,
    pub transfer_trigger: String,
    pub pallet_check_trigger: String,
    pub start_process: String,
    pub inbound_completed: String,
    pub outbound_completed: String,
    pub transfer_completed: String,
    pub pallet_check_completed: String,
    pub command_failed: String,
    pub error_alarm: String,
    pub error_code: String,
    pub source_floor: String,
    pub source_rail: String,
    pub source_block: String,
    pub source_depth: String,
    pub dest_floor: String,
    pub dest_rail: String,
    pub dest_block: String,
    pub dest_depth: String,
    pub gate_number: String,
    pub enter_direction: String,
    pub exit_direction: String,
    pub barcode_chars: Vec<String>,
    pub barcode_valid: String,
    pub barcode_invalid: String,
    pub available_pallet: String,
    pub unavailable_pallet: String,
    pub position_floor: String,
    pub position_rail: String,
    pub position_block: String,
    pub position_depth: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::plc::address::{parse_address, AddressArea};

    /// 测试模板绑定后的地址前缀
    #[test]
    fn test_bind_prefixes_db_number() {
        let template = SignalMapTemplate::default();
        let map = template.bind(7).unwrap();
        assert_eq!(map.db_number, 7);
        assert_eq!(map.inbound_trigger, "DB7.DBX0.0");
        assert_eq!(map.error_code, "DB7.DBW4");
        assert_eq!(map.barcode_chars.len(), BARCODE_REGISTER_COUNT);
        assert_eq!(map.barcode_chars[0], "DB7.DBW30");
        assert_eq!(map.barcode_chars[9], "DB7.DBW48");
    }

    /// 测试模板验证拒绝空地址和非DB地址
    #[test]
    fn test_template_validation() {
        let mut template = SignalMapTemplate::default();
        template.error_code = String::new();
        assert!(template.validate().is_err());

        let mut template = SignalMapTemplate::default();
        template.gate_number = "MW100".to_string();
        assert!(template.validate().is_err());

        assert!(SignalMapTemplate::default().validate().is_ok());
    }

    /// 测试数据块号必须为正数
    #[test]
    fn test_bind_rejects_zero_db() {
        assert!(SignalMapTemplate::default().bind(0).is_err());
    }

    /// 模板绑定数据块号后再经地址解析器还原出原始偏移量、类型和位号
    #[test]
    fn test_bind_parse_round_trip() {
        let template = SignalMapTemplate::default();
        let db = 12u16;
        let map = template.bind(db).unwrap();

        let trigger = parse_address(&map.inbound_trigger).unwrap();
        assert_eq!(trigger.db, db);
        assert_eq!(trigger.area, AddressArea::Bit);
        assert_eq!(trigger.offset, 0);
        assert_eq!(trigger.bit, Some(0));
        assert_eq!(format!("{}", trigger), format!("DB{}.{}", db, template.inbound_trigger));

        let code = parse_address(&map.error_code).unwrap();
        assert_eq!(code.db, db);
        assert_eq!(code.area, AddressArea::Word);
        assert_eq!(code.offset, 4);
        assert_eq!(code.bit, None);

        for (i, address) in map.barcode_chars.iter().enumerate() {
            let parsed = parse_address(address).unwrap();
            assert_eq!(parsed.db, db);
            assert_eq!(parsed.area, AddressArea::Word);
            assert_eq!(parsed.offset, 30 + (i as u16) * 2);
        }
    }
}
