//! # 模型枚举类型模块
//!
//! 定义网关中使用的各种枚举类型：任务类型、执行状态、
//! 任务跟踪状态、方向、恢复模式以及对外通知状态。
//!
//! 所有枚举均支持JSON序列化，并按需提供字符串双向转换能力。

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// 任务类型枚举
/// 网关支持的任务类型是封闭集合，不支持自定义任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// 入库任务
    Inbound,
    /// 出库任务
    Outbound,
    /// 移库任务
    Transfer,
    /// 盘点任务（检查托盘是否存在）
    CheckPallet,
}

impl CommandType {
    /// 判断是否为排他任务
    /// Transfer 和 CheckPallet 执行期间不允许任何其他任务调度
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Transfer | Self::CheckPallet)
    }
}

impl Display for CommandType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandType::Inbound => "Inbound",
            CommandType::Outbound => "Outbound",
            CommandType::Transfer => "Transfer",
            CommandType::CheckPallet => "CheckPallet",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Inbound" => Ok(CommandType::Inbound),
            "Outbound" => Ok(CommandType::Outbound),
            "Transfer" => Ok(CommandType::Transfer),
            "CheckPallet" => Ok(CommandType::CheckPallet),
            _ => Err(format!("未知的任务类型: {}", s)),
        }
    }
}

/// 任务执行状态枚举
/// Alarm 为中间通知状态，其余五个为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// 执行成功
    Success,
    /// 执行成功但过程中出现过报警
    Warning,
    /// 执行失败
    Failed,
    /// 执行超时
    Timeout,
    /// 已取消
    Cancelled,
    /// 报警（中间状态，任务仍在执行）
    Alarm,
}

impl ExecutionStatus {
    /// 判断是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Alarm)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "Success",
            ExecutionStatus::Warning => "Warning",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Timeout => "Timeout",
            ExecutionStatus::Cancelled => "Cancelled",
            ExecutionStatus::Alarm => "Alarm",
        };
        write!(f, "{}", s)
    }
}

/// 任务跟踪状态枚举
/// 状态转换单向：Pending -> Processing -> Completed，Removed 仅能从 Pending 进入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    /// 等待调度
    Pending,
    /// 执行中
    Processing,
    /// 已完成
    Completed,
    /// 已移除（软删除，仅限 Pending 状态）
    Removed,
}

impl Default for CommandState {
    fn default() -> Self {
        Self::Pending
    }
}

impl Display for CommandState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandState::Pending => "Pending",
            CommandState::Processing => "Processing",
            CommandState::Completed => "Completed",
            CommandState::Removed => "Removed",
        };
        write!(f, "{}", s)
    }
}

/// 出入口方向枚举
/// 在PLC线路上序列化为布尔值（Top 对应 true）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// 上方向
    Top,
    /// 下方向
    Bottom,
}

impl Direction {
    /// 转换为PLC布尔编码
    pub fn as_plc_bool(&self) -> bool {
        matches!(self, Self::Top)
    }

    /// 从PLC布尔编码还原
    pub fn from_plc_bool(value: bool) -> Self {
        if value {
            Self::Top
        } else {
            Self::Bottom
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Top
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Top => "Top",
            Direction::Bottom => "Bottom",
        };
        write!(f, "{}", s)
    }
}

/// 设备故障恢复模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMode {
    /// 自动恢复：按恢复间隔轮询设备就绪标志
    Auto,
    /// 手动恢复：等待客户端触发恢复事件
    Manual,
}

impl Default for RecoveryMode {
    fn default() -> Self {
        Self::Auto
    }
}

impl FromStr for RecoveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Auto" | "auto" => Ok(RecoveryMode::Auto),
            "Manual" | "manual" => Ok(RecoveryMode::Manual),
            _ => Err(format!("未知的恢复模式: {}", s)),
        }
    }
}

/// 对外通知状态枚举
/// 对外映射规则: {Warning, Success} -> Success, {Failed, Timeout, Cancelled} -> Failed,
/// {Alarm} -> Error（中间通知）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    /// 任务成功
    Success,
    /// 任务失败
    Failed,
    /// 报警（中间通知，任务仍在执行）
    Error,
}

impl From<ExecutionStatus> for NotificationStatus {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success | ExecutionStatus::Warning => Self::Success,
            ExecutionStatus::Failed | ExecutionStatus::Timeout | ExecutionStatus::Cancelled => {
                Self::Failed
            }
            ExecutionStatus::Alarm => Self::Error,
        }
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationStatus::Success => "Success",
            NotificationStatus::Failed => "Failed",
            NotificationStatus::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试任务类型的字符串双向转换
    #[test]
    fn test_command_type_round_trip() {
        for t in [
            CommandType::Inbound,
            CommandType::Outbound,
            CommandType::Transfer,
            CommandType::CheckPallet,
        ] {
            let s = t.to_string();
            assert_eq!(s.parse::<CommandType>().unwrap(), t);
        }
        assert!("Unknown".parse::<CommandType>().is_err());
    }

    /// 测试排他任务判断
    #[test]
    fn test_exclusive_command_types() {
        assert!(CommandType::Transfer.is_exclusive());
        assert!(CommandType::CheckPallet.is_exclusive());
        assert!(!CommandType::Inbound.is_exclusive());
        assert!(!CommandType::Outbound.is_exclusive());
    }

    /// 测试方向的PLC布尔编码
    #[test]
    fn test_direction_plc_bool() {
        assert!(Direction::Top.as_plc_bool());
        assert!(!Direction::Bottom.as_plc_bool());
        assert_eq!(Direction::from_plc_bool(true), Direction::Top);
        assert_eq!(Direction::from_plc_bool(false), Direction::Bottom);
    }

    /// 测试对外通知状态映射规则
    #[test]
    fn test_notification_status_mapping() {
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Success),
            NotificationStatus::Success
        );
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Warning),
            NotificationStatus::Success
        );
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Failed),
            NotificationStatus::Failed
        );
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Timeout),
            NotificationStatus::Failed
        );
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Cancelled),
            NotificationStatus::Failed
        );
        assert_eq!(
            NotificationStatus::from(ExecutionStatus::Alarm),
            NotificationStatus::Error
        );
    }

    /// 测试终态判断
    #[test]
    fn test_terminal_status() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Alarm.is_terminal());
    }
}
