//! # 网关配置管理模块
//!
//! ## 业务说明
//! 管理网关运行所需的全部配置：日志设置、设备连接参数、
//! 工位划分及故障恢复策略。
//!
//! ## 配置加载机制
//! - **文件加载**: 支持TOML/JSON/YAML等格式的配置文件
//! - **环境变量**: `WCS_` 前缀的环境变量覆盖文件配置
//! - **默认值**: 提供合理的默认配置，降低配置复杂度
//! - **验证机制**: 配置加载后进行完整性和有效性验证

use crate::models::{CommandType, RecoveryMode, SlotConfiguration};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 设备运行选项
/// 注册设备时传入，决定该设备全部工位的执行与恢复行为
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// 设备ID
    pub device_id: String,
    /// 单个任务的执行超时（毫秒）
    pub command_timeout_ms: u64,
    /// 报警即失败：任何非零错误代码立即终止任务
    pub fail_on_alarm: bool,
    /// 故障恢复模式
    pub recovery_mode: RecoveryMode,
    /// 自动恢复的轮询间隔（毫秒）
    pub recovery_interval_ms: u64,
}

impl DeviceOptions {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            command_timeout_ms: 60_000,
            fail_on_alarm: false,
            recovery_mode: RecoveryMode::Auto,
            recovery_interval_ms: 5_000,
        }
    }

    /// 任务执行超时
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// 自动恢复轮询间隔
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    /// 验证选项合法性
    pub fn validate(&self) -> AppResult<()> {
        if self.device_id.is_empty() {
            return Err(AppError::configuration_error("设备ID不能为空"));
        }
        if self.command_timeout_ms == 0 {
            return Err(AppError::configuration_error("任务执行超时必须大于0"));
        }
        if self.recovery_interval_ms == 0 {
            return Err(AppError::configuration_error("恢复轮询间隔必须大于0"));
        }
        Ok(())
    }
}

/// 日志设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// 日志级别 (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出模块路径
    #[serde(default)]
    pub show_module_path: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            show_module_path: false,
        }
    }
}

/// 工位配置条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfigEntry {
    /// 工位ID（正数，设备内唯一）
    pub slot_id: u16,
    /// 数据块号（正数，设备内唯一）
    pub db_number: u16,
    /// 支持的任务类型，空表示支持全部
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl SlotConfigEntry {
    /// 转换为工位配置
    pub fn to_slot_configuration(&self) -> AppResult<SlotConfiguration> {
        let mut slot = SlotConfiguration::new(self.slot_id, self.db_number);
        if !self.capabilities.is_empty() {
            let mut capabilities = Vec::new();
            for name in &self.capabilities {
                let command_type = name
                    .parse::<CommandType>()
                    .map_err(AppError::configuration_error)?;
                capabilities.push(command_type);
            }
            slot = slot.with_capabilities(capabilities);
        }
        Ok(slot)
    }
}

/// 设备配置条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    /// 设备ID
    pub device_id: String,
    /// 仿真PLC主机地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 仿真PLC端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// 单次读写操作超时（毫秒）
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// 任务执行超时（毫秒）
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 报警即失败
    #[serde(default)]
    pub fail_on_alarm: bool,
    /// 恢复模式 (Auto / Manual)
    #[serde(default = "default_recovery_mode")]
    pub recovery_mode: String,
    /// 自动恢复轮询间隔（毫秒）
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    /// 工位列表
    pub slots: Vec<SlotConfigEntry>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10502
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_operation_timeout_ms() -> u64 {
    1000
}

fn default_command_timeout_ms() -> u64 {
    60_000
}

fn default_recovery_mode() -> String {
    "Auto".to_string()
}

fn default_recovery_interval_ms() -> u64 {
    5000
}

impl DeviceConfigEntry {
    /// 转换为设备运行选项
    pub fn to_device_options(&self) -> AppResult<DeviceOptions> {
        let recovery_mode = self
            .recovery_mode
            .parse::<RecoveryMode>()
            .map_err(AppError::configuration_error)?;
        let options = DeviceOptions {
            device_id: self.device_id.clone(),
            command_timeout_ms: self.command_timeout_ms,
            fail_on_alarm: self.fail_on_alarm,
            recovery_mode,
            recovery_interval_ms: self.recovery_interval_ms,
        };
        options.validate()?;
        Ok(options)
    }

    /// 转换为工位配置列表
    pub fn to_slot_configurations(&self) -> AppResult<Vec<SlotConfiguration>> {
        self.slots
            .iter()
            .map(|entry| entry.to_slot_configuration())
            .collect()
    }
}

/// 网关主配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 日志设置
    #[serde(default)]
    pub logging: LoggingSettings,
    /// 设备配置列表
    #[serde(default)]
    pub devices: Vec<DeviceConfigEntry>,
}

impl GatewayConfig {
    /// 从配置文件与环境变量加载配置
    /// 环境变量使用 `WCS_` 前缀，`__` 作为层级分隔符
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("WCS")
                .separator("__")
                .try_parsing(true),
        );
        let loaded = builder
            .build()
            .map_err(|e| AppError::configuration_error(format!("配置加载失败: {}", e)))?;
        let config: Self = loaded
            .try_deserialize()
            .map_err(|e| AppError::configuration_error(format!("配置解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置完整性
    /// 工位ID与数据块号在设备内必须为正且唯一
    pub fn validate(&self) -> AppResult<()> {
        for device in &self.devices {
            device.to_device_options()?;
            if device.slots.is_empty() {
                return Err(AppError::configuration_error(format!(
                    "设备 {} 未配置任何工位",
                    device.device_id
                )));
            }
            let mut slot_ids = std::collections::HashSet::new();
            let mut db_numbers = std::collections::HashSet::new();
            for slot in &device.slots {
                if slot.slot_id == 0 {
                    return Err(AppError::configuration_error(format!(
                        "设备 {} 的工位ID必须大于0",
                        device.device_id
                    )));
                }
                if slot.db_number == 0 {
                    return Err(AppError::configuration_error(format!(
                        "设备 {} 的数据块号必须大于0",
                        device.device_id
                    )));
                }
                if !slot_ids.insert(slot.slot_id) {
                    return Err(AppError::configuration_error(format!(
                        "设备 {} 的工位ID重复: {}",
                        device.device_id, slot.slot_id
                    )));
                }
                if !db_numbers.insert(slot.db_number) {
                    return Err(AppError::configuration_error(format!(
                        "设备 {} 的数据块号重复: {}",
                        device.device_id, slot.db_number
                    )));
                }
                slot.to_slot_configuration()?;
            }
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            devices: Vec::new(),
        }
    }
}
