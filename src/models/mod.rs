// 核心数据模型模块
pub mod enums;
pub mod error_codes;
pub mod structs;

pub use enums::{
    CommandState, CommandType, Direction, ExecutionStatus, NotificationStatus, RecoveryMode,
};
pub use error_codes::{lookup_error_message, EXCEPTION_ERROR_CODE};
pub use structs::{
    validate_envelope_locations, AlarmGate, BarcodeValidationRequest, BarcodeValidationResponse,
    CommandEnvelope, CommandResult, CommandTrackingInfo, DeviceErrorGate, DeviceStatistics,
    ErrorDetail, ExecutionStep, GatewayStatus, Location, ReadyTicket, ResultNotification,
    SlotConfiguration,
};
