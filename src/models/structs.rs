//! # 核心数据模型模块
//!
//! ## 业务说明
//! 定义网关调度与执行链路上流转的全部数据结构：
//! - **任务信封**: 客户端提交的不可变任务描述
//! - **库位与方向**: 仓库坐标及出入口方向
//! - **执行结果**: 任务执行的中间与终态结果
//! - **跟踪记录**: 任务全生命周期的状态快照
//! - **调度凭据**: 工位就绪凭据、设备故障门、全局报警门
//!
//! 所有结构体均支持JSON序列化，时间戳统一使用 `chrono::DateTime<Utc>`。

use crate::models::enums::{
    CommandState, CommandType, Direction, ExecutionStatus, NotificationStatus,
};
use crate::models::error_codes::lookup_error_message;
use crate::utils::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// 仓库库位坐标
/// 渲染格式为 `F{floor}R{rail}B{block}D{depth}`，深度默认为1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// 楼层
    pub floor: u16,
    /// 巷道
    pub rail: u16,
    /// 货格
    pub block: u16,
    /// 深度
    pub depth: u16,
}

impl Location {
    /// 创建库位，深度默认为1
    pub fn new(floor: u16, rail: u16, block: u16) -> Self {
        Self {
            floor,
            rail,
            block,
            depth: 1,
        }
    }

    /// 创建带深度的库位
    pub fn with_depth(floor: u16, rail: u16, block: u16, depth: u16) -> Self {
        Self {
            floor,
            rail,
            block,
            depth,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "F{}R{}B{}D{}",
            self.floor, self.rail, self.block, self.depth
        )
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 解析 F{floor}R{rail}B{block}D{depth} 格式，D段可省略
        let parse_err = || format!("无效的库位格式: {}", s);
        let rest = s.strip_prefix('F').ok_or_else(parse_err)?;
        let (floor, rest) = rest.split_once('R').ok_or_else(parse_err)?;
        let (rail, rest) = rest.split_once('B').ok_or_else(parse_err)?;
        let (block, depth) = match rest.split_once('D') {
            Some((block, depth)) => (block, depth.parse::<u16>().map_err(|_| parse_err())?),
            None => (rest, 1),
        };
        Ok(Self {
            floor: floor.parse().map_err(|_| parse_err())?,
            rail: rail.parse().map_err(|_| parse_err())?,
            block: block.parse().map_err(|_| parse_err())?,
            depth,
        })
    }
}

/// 任务信封
/// 客户端提交的不可变任务描述，创建后不再修改，
/// 由跟踪器在清理时销毁
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// 任务ID（客户端提供，全局唯一）
    pub command_id: String,
    /// 目标设备ID（亲和性提示，可选）
    pub device_id: Option<String>,
    /// 任务类型
    pub command_type: CommandType,
    /// 源库位
    pub source: Option<Location>,
    /// 目标库位
    pub destination: Option<Location>,
    /// 出入口编号
    pub gate_number: u16,
    /// 进入方向
    pub enter_direction: Direction,
    /// 离开方向
    pub exit_direction: Direction,
    /// 提交时间
    pub submitted_at: DateTime<Utc>,
}

impl CommandEnvelope {
    /// 创建新的任务信封
    pub fn new(command_id: impl Into<String>, command_type: CommandType) -> Self {
        Self {
            command_id: command_id.into(),
            device_id: None,
            command_type,
            source: None,
            destination: None,
            gate_number: 0,
            enter_direction: Direction::default(),
            exit_direction: Direction::default(),
            submitted_at: Utc::now(),
        }
    }

    /// 指定目标设备
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// 指定源库位
    pub fn with_source(mut self, source: Location) -> Self {
        self.source = Some(source);
        self
    }

    /// 指定目标库位
    pub fn with_destination(mut self, destination: Location) -> Self {
        self.destination = Some(destination);
        self
    }

    /// 指定出入口编号
    pub fn with_gate(mut self, gate_number: u16) -> Self {
        self.gate_number = gate_number;
        self
    }

    /// 指定进入方向
    pub fn with_enter_direction(mut self, direction: Direction) -> Self {
        self.enter_direction = direction;
        self
    }

    /// 指定离开方向
    pub fn with_exit_direction(mut self, direction: Direction) -> Self {
        self.exit_direction = direction;
        self
    }
}

/// 错误详情
/// 错误代码来自PLC错误寄存器或保留的异常包装代码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// 错误代码
    pub code: u16,
    /// 错误描述（从静态代码表解析）
    pub message: String,
    /// 检测到错误的时间
    pub detected_at: DateTime<Utc>,
}

impl ErrorDetail {
    /// 根据错误代码创建错误详情，描述从静态代码表解析
    pub fn from_code(code: u16) -> Self {
        Self {
            code,
            message: lookup_error_message(code),
            detected_at: Utc::now(),
        }
    }

    /// 使用保留代码999包装网关内部异常
    pub fn from_exception(error: &AppError) -> Self {
        Self {
            code: crate::models::error_codes::EXCEPTION_ERROR_CODE,
            message: error.to_string(),
            detected_at: Utc::now(),
        }
    }
}

/// 执行步骤记录
/// 记录任务执行过程中的每个协议步骤，用于诊断
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 步骤ID
    pub step_id: String,
    /// 步骤名称
    pub name: String,
    /// 步骤详情
    pub detail: String,
    /// 记录时间
    pub timestamp: DateTime<Utc>,
}

impl ExecutionStep {
    /// 创建新的执行步骤记录
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            name: name.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 任务执行结果
/// 工位执行器与信号监视器产出的中间/终态结果，
/// 经结果通道流向应答中心
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// 任务ID
    pub command_id: String,
    /// 设备ID
    pub device_id: String,
    /// 工位ID
    pub slot_id: u16,
    /// 执行状态
    pub status: ExecutionStatus,
    /// 结果消息
    pub message: String,
    /// 执行开始时间
    pub started_at: DateTime<Utc>,
    /// 执行完成时间
    pub completed_at: DateTime<Utc>,
    /// 盘点结果：托盘存在
    pub pallet_available: Option<bool>,
    /// 盘点结果：托盘不存在
    pub pallet_unavailable: Option<bool>,
    /// 错误详情
    pub error: Option<ErrorDetail>,
    /// 执行步骤列表（按时间顺序）
    pub steps: Vec<ExecutionStep>,
}

impl CommandResult {
    /// 创建指定状态的结果
    pub fn new(
        command_id: impl Into<String>,
        device_id: impl Into<String>,
        slot_id: u16,
        status: ExecutionStatus,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            command_id: command_id.into(),
            device_id: device_id.into(),
            slot_id,
            status,
            message: message.into(),
            started_at: now,
            completed_at: now,
            pallet_available: None,
            pallet_unavailable: None,
            error: None,
            steps: Vec::new(),
        }
    }

    /// 创建成功结果
    pub fn success(
        command_id: impl Into<String>,
        device_id: impl Into<String>,
        slot_id: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::new(command_id, device_id, slot_id, ExecutionStatus::Success, message)
    }

    /// 创建失败结果
    pub fn failure(
        command_id: impl Into<String>,
        device_id: impl Into<String>,
        slot_id: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::new(command_id, device_id, slot_id, ExecutionStatus::Failed, message)
    }

    /// 创建报警中间结果
    pub fn alarm(
        command_id: impl Into<String>,
        device_id: impl Into<String>,
        slot_id: u16,
        error: ErrorDetail,
    ) -> Self {
        let mut result = Self::new(
            command_id,
            device_id,
            slot_id,
            ExecutionStatus::Alarm,
            error.message.clone(),
        );
        result.error = Some(error);
        result
    }

    /// 附加错误详情
    pub fn with_error(mut self, error: ErrorDetail) -> Self {
        self.error = Some(error);
        self
    }

    /// 执行耗时（毫秒）
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// 任务跟踪记录
/// 跟踪器内部维护的任务全生命周期状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTrackingInfo {
    /// 任务信封
    pub envelope: CommandEnvelope,
    /// 当前跟踪状态
    pub state: CommandState,
    /// 执行设备（进入 Processing 后填充）
    pub device_id: Option<String>,
    /// 最后一次结果状态
    pub last_status: Option<ExecutionStatus>,
    /// 最后一次结果
    pub last_result: Option<CommandResult>,
    /// 提交时间
    pub submitted_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
}

impl CommandTrackingInfo {
    /// 以 Pending 状态创建跟踪记录
    pub fn pending(envelope: CommandEnvelope) -> Self {
        let submitted_at = envelope.submitted_at;
        Self {
            envelope,
            state: CommandState::Pending,
            device_id: None,
            last_status: None,
            last_result: None,
            submitted_at,
            started_at: None,
            completed_at: None,
        }
    }
}

/// 设备故障门
/// 激活期间调度器跳过该设备的所有工位
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceErrorGate {
    /// 设备ID
    pub device_id: String,
    /// 首个报告故障的工位ID
    pub slot_id: u16,
    /// 故障消息
    pub message: String,
    /// 错误代码
    pub error_code: Option<u16>,
    /// 故障门激活时间
    pub since: DateTime<Utc>,
}

/// 全局报警门
/// 激活期间调度器拒绝所有调度，由引发报警的任务到达终态后清除
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmGate {
    /// 引发报警的任务ID
    pub command_id: String,
    /// 报警详情
    pub error: ErrorDetail,
    /// 报警门激活时间
    pub since: DateTime<Utc>,
}

/// 工位配置
/// 同一物理连接上的并行工作通道，仅以数据块号区分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfiguration {
    /// 工位ID（正数，设备内唯一）
    pub slot_id: u16,
    /// 数据块号（正数，设备内唯一）
    pub db_number: u16,
    /// 支持的任务类型集合
    pub capabilities: Vec<CommandType>,
}

impl SlotConfiguration {
    /// 创建支持全部任务类型的工位配置
    pub fn new(slot_id: u16, db_number: u16) -> Self {
        Self {
            slot_id,
            db_number,
            capabilities: vec![
                CommandType::Inbound,
                CommandType::Outbound,
                CommandType::Transfer,
                CommandType::CheckPallet,
            ],
        }
    }

    /// 指定支持的任务类型集合
    pub fn with_capabilities(mut self, capabilities: Vec<CommandType>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// 判断是否支持指定任务类型
    pub fn supports(&self, command_type: CommandType) -> bool {
        self.capabilities.contains(&command_type)
    }
}

/// 工位就绪凭据
/// 工位每次进入就绪状态时发出一张，由调度器消费
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyTicket {
    /// 设备ID
    pub device_id: String,
    /// 工位ID
    pub slot_id: u16,
    /// 进入就绪状态的时间
    pub ready_at: DateTime<Utc>,
    /// 发出时等待队列深度
    pub queue_depth: usize,
}

/// 结果通知
/// 广播总线上的对外通知条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultNotification {
    /// 任务ID
    pub command_id: String,
    /// 设备ID
    pub device_id: String,
    /// 对外状态（压缩映射后）
    pub status: NotificationStatus,
    /// 原始执行状态
    pub raw_status: ExecutionStatus,
    /// 结果消息
    pub message: String,
    /// 完成时间
    pub completed_at: DateTime<Utc>,
    /// 执行耗时（毫秒）
    pub duration_ms: i64,
    /// 错误详情
    pub error: Option<ErrorDetail>,
    /// 诊断负载（执行步骤）
    pub steps: Option<Vec<ExecutionStep>>,
}

impl From<&CommandResult> for ResultNotification {
    fn from(result: &CommandResult) -> Self {
        Self {
            command_id: result.command_id.clone(),
            device_id: result.device_id.clone(),
            status: NotificationStatus::from(result.status),
            raw_status: result.status,
            message: result.message.clone(),
            completed_at: result.completed_at,
            duration_ms: result.duration_ms(),
            error: result.error.clone(),
            steps: if result.steps.is_empty() {
                None
            } else {
                Some(result.steps.clone())
            },
        }
    }
}

/// 条码验证请求
/// 入库任务读取到条码后交给外部验证协作方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeValidationRequest {
    /// 任务ID
    pub command_id: String,
    /// 设备ID
    pub device_id: String,
    /// 10字符条码
    pub barcode: String,
}

/// 条码验证响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeValidationResponse {
    /// 条码是否有效
    pub is_valid: bool,
    /// 分配的目标库位
    pub destination: Option<Location>,
    /// 分配的出入口编号（必须大于0）
    pub gate_number: Option<u16>,
    /// 进入方向
    pub enter_direction: Option<Direction>,
}

impl BarcodeValidationResponse {
    /// 创建拒绝响应
    pub fn rejected() -> Self {
        Self {
            is_valid: false,
            destination: None,
            gate_number: None,
            enter_direction: None,
        }
    }

    /// 创建接受响应
    pub fn accepted(destination: Location, gate_number: u16, enter_direction: Direction) -> Self {
        Self {
            is_valid: true,
            destination: Some(destination),
            gate_number: Some(gate_number),
            enter_direction: Some(enter_direction),
        }
    }

    /// 判断响应是否可用于写入任务参数
    /// 缺少目标库位或出入口编号（或编号为0）的响应视为无效
    pub fn is_usable(&self) -> bool {
        self.is_valid && self.destination.is_some() && self.gate_number.map_or(false, |g| g > 0)
    }
}

/// 单设备调度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatistics {
    /// 执行中任务数
    pub processing: usize,
    /// 已完成任务数
    pub completed: usize,
    /// 成功任务数
    pub succeeded: usize,
    /// 失败任务数
    pub failed: usize,
    /// 设备故障门是否激活
    pub error_gate_active: bool,
}

/// 网关整体状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatus {
    /// 等待调度任务数
    pub queued: usize,
    /// 执行中任务数
    pub processing: usize,
    /// 已完成任务数
    pub completed: usize,
    /// 是否处于暂停状态
    pub paused: bool,
    /// 各设备统计
    pub device_statistics: std::collections::HashMap<String, DeviceStatistics>,
}

/// 验证任务信封的库位组合是否满足任务类型要求
/// 入库任务的目标库位在条码验证后注入，提交时不作要求
pub fn validate_envelope_locations(envelope: &CommandEnvelope) -> AppResult<()> {
    match envelope.command_type {
        CommandType::Inbound => Ok(()),
        CommandType::Outbound => {
            if envelope.source.is_none() {
                return Err(AppError::validation_error("出库任务必须提供源库位"));
            }
            Ok(())
        }
        CommandType::Transfer => {
            if envelope.source.is_none() || envelope.destination.is_none() {
                return Err(AppError::validation_error(
                    "移库任务必须同时提供源库位和目标库位",
                ));
            }
            Ok(())
        }
        CommandType::CheckPallet => {
            let source = envelope
                .source
                .ok_or_else(|| AppError::validation_error("盘点任务必须提供源库位"))?;
            if source.depth == 0 {
                return Err(AppError::validation_error("盘点任务源库位深度必须大于0"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试库位渲染与解析的往返一致性
    #[test]
    fn test_location_display_round_trip() {
        let loc = Location::with_depth(1, 2, 3, 2);
        assert_eq!(loc.to_string(), "F1R2B3D2");
        assert_eq!("F1R2B3D2".parse::<Location>().unwrap(), loc);

        // 省略深度段时默认为1
        let parsed = "F4R5B6".parse::<Location>().unwrap();
        assert_eq!(parsed, Location::new(4, 5, 6));
        assert_eq!(parsed.depth, 1);

        assert!("X1Y2".parse::<Location>().is_err());
    }

    /// 测试任务信封构建器
    #[test]
    fn test_envelope_builder() {
        let envelope = CommandEnvelope::new("T1", CommandType::Outbound)
            .with_device("D1")
            .with_source(Location::new(1, 2, 3))
            .with_gate(2);
        assert_eq!(envelope.command_id, "T1");
        assert_eq!(envelope.device_id.as_deref(), Some("D1"));
        assert_eq!(envelope.gate_number, 2);
    }

    /// 测试各任务类型的库位要求
    #[test]
    fn test_envelope_location_requirements() {
        // 出库缺少源库位
        let outbound = CommandEnvelope::new("T1", CommandType::Outbound);
        assert!(validate_envelope_locations(&outbound).is_err());

        // 移库缺少目标库位
        let transfer =
            CommandEnvelope::new("T2", CommandType::Transfer).with_source(Location::new(1, 1, 1));
        assert!(validate_envelope_locations(&transfer).is_err());

        // 入库提交时无需库位
        let inbound = CommandEnvelope::new("T3", CommandType::Inbound);
        assert!(validate_envelope_locations(&inbound).is_ok());

        // 盘点需要带深度的源库位
        let check = CommandEnvelope::new("T4", CommandType::CheckPallet)
            .with_source(Location::with_depth(1, 2, 3, 1));
        assert!(validate_envelope_locations(&check).is_ok());
    }

    /// 测试错误详情的代码解析
    #[test]
    fn test_error_detail_from_code() {
        let detail = ErrorDetail::from_code(15);
        assert_eq!(detail.code, 15);
        assert_eq!(detail.message, "Warning: Pallet not meeting requirements");

        let unknown = ErrorDetail::from_code(12345);
        assert_eq!(unknown.message, "Unknown error code: 12345");
    }

    /// 测试条码验证响应的可用性判断
    #[test]
    fn test_barcode_response_usability() {
        assert!(!BarcodeValidationResponse::rejected().is_usable());

        let accepted =
            BarcodeValidationResponse::accepted(Location::new(2, 1, 1), 3, Direction::Top);
        assert!(accepted.is_usable());

        // 出入口编号为0的响应不可用
        let mut bad_gate = accepted.clone();
        bad_gate.gate_number = Some(0);
        assert!(!bad_gate.is_usable());

        // 缺少目标库位的响应不可用
        let mut no_dest =
            BarcodeValidationResponse::accepted(Location::new(2, 1, 1), 3, Direction::Top);
        no_dest.destination = None;
        assert!(!no_dest.is_usable());
    }
}
