//! PLC错误代码表
//!
//! 设备错误代码寄存器中的数值与描述文本的静态映射。
//! 代码999保留给异常包装器使用，不属于PLC报警范围。

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// 异常包装器保留代码
/// 网关内部异常（非PLC报警）转换为 ErrorDetail 时使用
pub const EXCEPTION_ERROR_CODE: u16 = 999;

/// 错误代码与描述文本的静态映射表
static ERROR_CODE_TABLE: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(1, "Emergency stop activated");
    table.insert(2, "Main power supply failure");
    table.insert(3, "Shuttle motor overload");
    table.insert(4, "Elevator motor overload");
    table.insert(5, "Shuttle position lost");
    table.insert(6, "Elevator position lost");
    table.insert(7, "Pallet sensor malfunction");
    table.insert(8, "Gate blocked");
    table.insert(9, "Rail obstruction detected");
    table.insert(10, "Lift door not closed");
    table.insert(11, "Pallet not found at source location");
    table.insert(12, "Destination location occupied");
    table.insert(13, "Pallet overhang detected");
    table.insert(14, "Pallet overweight");
    table.insert(15, "Warning: Pallet not meeting requirements");
    table.insert(16, "Barcode reader offline");
    table.insert(17, "Shuttle battery low");
    table.insert(18, "Shuttle communication lost");
    table.insert(19, "Hydraulic pressure out of range");
    table.insert(20, "Conveyor jam at gate");
    table.insert(EXCEPTION_ERROR_CODE, "Internal gateway exception");
    table
});

/// 根据错误代码查询描述文本
/// 未知代码返回固定格式的回退文本
pub fn lookup_error_message(code: u16) -> String {
    match ERROR_CODE_TABLE.get(&code) {
        Some(message) => (*message).to_string(),
        None => format!("Unknown error code: {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 已知代码应解析为表中的描述
    #[test]
    fn test_known_error_codes() {
        assert_eq!(
            lookup_error_message(15),
            "Warning: Pallet not meeting requirements"
        );
        assert_eq!(lookup_error_message(1), "Emergency stop activated");
        assert_eq!(
            lookup_error_message(EXCEPTION_ERROR_CODE),
            "Internal gateway exception"
        );
    }

    /// 未知代码应渲染为固定回退文本
    #[test]
    fn test_unknown_error_code_fallback() {
        assert_eq!(lookup_error_message(4711), "Unknown error code: 4711");
        assert_eq!(lookup_error_message(0), "Unknown error code: 0");
    }
}
