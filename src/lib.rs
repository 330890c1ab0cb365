//! # wcs-gateway
//!
//! 仓储管理系统与穿梭车/提升机PLC设备之间的自动化网关。
//!
//! 客户端向协调器提交运输任务（入库、出库、移库、盘点），
//! 网关在全局调度规则下将任务撮合到各设备的工位上，
//! 按任务类型的协议驱动寄存器写入与标志轮询，
//! 并行监视报警与完成信号，将结果以通知流返回客户端。
//!
//! 一条物理PLC连接可承载多个逻辑工位，工位之间仅以数据块号区分。

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod models;
pub mod utils;

pub use application::GatewayCoordinator;
pub use domain::services::{
    FnBarcodeValidator, IBarcodeValidator, ICommandStrategy, ILayoutValidator,
};
pub use infrastructure::plc::{
    EmulatedPlcClient, EmulatedPlcConfig, IPlcClient, MockPlcClient, SignalMap, SignalMapTemplate,
};
pub use models::{
    BarcodeValidationRequest, BarcodeValidationResponse, CommandEnvelope, CommandResult,
    CommandState, CommandType, Direction, ErrorDetail, ExecutionStatus, GatewayStatus, Location,
    NotificationStatus, RecoveryMode, ResultNotification, SlotConfiguration,
};
pub use utils::config::{DeviceOptions, GatewayConfig};
pub use utils::error::{AppError, AppResult};
