use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序统一错误类型
/// 用于封装网关中可能出现的各种错误，提供统一的错误处理机制
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    /// 通用错误，包含错误消息
    #[error("通用错误: {message}")]
    Generic { message: String },

    /// PLC通信相关错误
    #[error("PLC通信错误: {message}")]
    PlcCommunicationError { message: String },

    /// PLC连接丢失
    #[error("PLC连接丢失: {message}")]
    ConnectionLost { message: String },

    /// PLC地址无效
    #[error("无效的PLC地址: {address} - {message}")]
    InvalidAddress { address: String, message: String },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    ConfigurationError { message: String },

    /// 验证错误（任务参数验证失败）
    #[error("验证错误: {message}")]
    ValidationError { message: String },

    /// 数据序列化/反序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// 并发/异步操作错误
    #[error("并发错误: {message}")]
    ConcurrencyError { message: String },

    /// 资源未找到错误
    #[error("资源未找到: {resource_type} - {message}")]
    NotFoundError {
        resource_type: String,
        message: String,
    },

    /// 超时错误
    #[error("操作超时: {operation} - {message}")]
    TimeoutError { operation: String, message: String },

    /// 任务执行相关错误
    #[error("任务执行错误: {command_id} - {message}")]
    CommandExecutionError { command_id: String, message: String },

    /// 状态转换错误
    #[error("状态转换错误: 从 {from_state} 到 {to_state} - {message}")]
    StateTransitionError {
        from_state: String,
        to_state: String,
        message: String,
    },

    /// 服务未初始化错误
    #[error("服务未初始化: {service_name}, 原因: {reason}")]
    NotInitializedError { service_name: String, reason: String },

    /// 服务关闭失败错误
    #[error("服务关闭失败: {service_name}, 原因: {reason}")]
    ServiceShutdownError { service_name: String, reason: String },
}

impl AppError {
    /// 创建通用错误
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// 创建PLC通信错误
    pub fn plc_communication_error(message: impl Into<String>) -> Self {
        Self::PlcCommunicationError {
            message: message.into(),
        }
    }

    /// 创建PLC连接丢失错误
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// 创建PLC地址无效错误
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// 创建验证错误
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// 创建序列化错误
    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// 创建并发错误
    pub fn concurrency_error(message: impl Into<String>) -> Self {
        Self::ConcurrencyError {
            message: message.into(),
        }
    }

    /// 创建资源未找到错误
    pub fn not_found_error(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFoundError {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout_error(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TimeoutError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 创建任务执行错误
    pub fn command_execution_error(
        command_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::CommandExecutionError {
            command_id: command_id.into(),
            message: message.into(),
        }
    }

    /// 创建状态转换错误
    pub fn state_transition_error(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StateTransitionError {
            from_state: from_state.into(),
            to_state: to_state.into(),
            message: message.into(),
        }
    }

    /// 创建服务未初始化错误
    pub fn not_initialized_error(
        service_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::NotInitializedError {
            service_name: service_name.into(),
            reason: reason.into(),
        }
    }

    /// 创建服务关闭失败错误
    pub fn service_shutdown_error(
        service_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ServiceShutdownError {
            service_name: service_name.into(),
            reason: reason.into(),
        }
    }

    /// 判断是否为超时类错误
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError { .. })
    }

    /// 判断是否为连接类错误
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::PlcCommunicationError { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::TimeoutError {
                operation: "io".to_string(),
                message: err.to_string(),
            },
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionLost {
                message: err.to_string(),
            },
            _ => Self::PlcCommunicationError {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            message: err.to_string(),
        }
    }
}

/// 应用程序统一结果类型别名
pub type AppResult<T> = Result<T, AppError>;
