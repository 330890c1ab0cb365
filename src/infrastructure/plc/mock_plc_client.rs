//! Mock PLC 客户端实现
//! 用于开发和测试阶段，模拟真实的PLC通信行为

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::plc_client::{IPlcClient, PlcCommunicationStats, PlcConnectionStatus};
use crate::utils::error::{AppError, AppResult};

/// 写入操作记录
/// 用于测试验证写入操作是否按预期执行
#[derive(Debug, Clone)]
pub struct WriteOperation {
    /// 写入时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// 写入地址
    pub address: String,
    /// 写入的值
    pub value: Value,
    /// 操作类型描述
    pub operation_type: String,
}

/// Mock PLC 客户端实现
/// 提供完整的PLC客户端接口模拟，支持数据存储和读写操作记录
pub struct MockPlcClient {
    /// 设备ID
    device_id: String,
    /// 连接状态
    connection_status: Arc<Mutex<PlcConnectionStatus>>,
    /// 内部数据存储（地址 -> 值）
    data_storage: Arc<Mutex<HashMap<String, Value>>>,
    /// 写入操作记录（用于测试验证）
    write_log: Arc<Mutex<Vec<WriteOperation>>>,
    /// 通信统计信息
    stats: Arc<Mutex<PlcCommunicationStats>>,
    /// PLC程序软件链接标志
    link_established: Arc<Mutex<bool>>,
    /// 设备就绪标志
    device_ready: Arc<Mutex<bool>>,
    /// 是否模拟网络延迟
    simulate_network_delay: bool,
    /// 网络延迟时间（毫秒）
    network_delay_ms: u64,
    /// 是否模拟错误
    simulate_errors: bool,
    /// 错误率（0.0-1.0）
    error_rate: f64,
}

impl MockPlcClient {
    /// 创建新的 Mock PLC 客户端实例
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            connection_status: Arc::new(Mutex::new(PlcConnectionStatus::Disconnected)),
            data_storage: Arc::new(Mutex::new(HashMap::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(PlcCommunicationStats::default())),
            link_established: Arc::new(Mutex::new(true)),
            device_ready: Arc::new(Mutex::new(true)),
            simulate_network_delay: true,
            network_delay_ms: 10,
            simulate_errors: false,
            error_rate: 0.01, // 1% 错误率
        }
    }

    /// 创建用于测试的 Mock PLC 客户端实例
    /// 禁用网络延迟和错误模拟，以便快速测试
    pub fn new_for_testing(device_id: impl Into<String>) -> Self {
        let mut client = Self::new(device_id);
        client.simulate_network_delay = false;
        client.simulate_errors = false;
        client
    }

    /// 预设读取值
    /// 为指定地址设置预期的读取返回值
    pub fn preset_read_value(&self, address: impl Into<String>, value: Value) {
        let mut storage = self.data_storage.lock().unwrap();
        storage.insert(address.into(), value);
    }

    /// 预设多个读取值
    pub fn preset_read_values(&self, values: HashMap<String, Value>) {
        let mut storage = self.data_storage.lock().unwrap();
        for (address, value) in values {
            storage.insert(address, value);
        }
    }

    /// 设置PLC程序软件链接标志
    pub fn set_link_established(&self, established: bool) {
        *self.link_established.lock().unwrap() = established;
    }

    /// 设置设备就绪标志
    pub fn set_device_ready(&self, ready: bool) {
        *self.device_ready.lock().unwrap() = ready;
    }

    /// 获取写入日志
    /// 返回所有记录的写入操作，用于测试验证
    pub fn get_write_log(&self) -> Vec<WriteOperation> {
        self.write_log.lock().unwrap().clone()
    }

    /// 清空写入日志
    pub fn clear_write_log(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// 获取最后一次写入操作
    pub fn get_last_write(&self) -> Option<WriteOperation> {
        self.write_log.lock().unwrap().last().cloned()
    }

    /// 检查是否写入了指定地址
    pub fn was_address_written(&self, address: &str) -> bool {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .any(|op| op.address == address)
    }

    /// 返回写入指定地址的全部值（按时间顺序）
    pub fn writes_to(&self, address: &str) -> Vec<Value> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.address == address)
            .map(|op| op.value.clone())
            .collect()
    }

    /// 设置网络延迟模拟
    pub fn set_network_delay(&mut self, enable: bool, delay_ms: u64) {
        self.simulate_network_delay = enable;
        self.network_delay_ms = delay_ms;
    }

    /// 设置错误模拟
    pub fn set_error_simulation(&mut self, enable: bool, error_rate: f64) {
        self.simulate_errors = enable;
        self.error_rate = error_rate.clamp(0.0, 1.0);
    }

    /// 模拟一次通信前的延迟和随机错误
    async fn simulate_communication(&self, operation: &str) -> AppResult<()> {
        if self.simulate_network_delay {
            sleep(Duration::from_millis(self.network_delay_ms)).await;
        }
        if self.simulate_errors {
            let roll: f64 = rand::thread_rng().gen();
            if roll < self.error_rate {
                return Err(AppError::plc_communication_error(format!(
                    "模拟通信失败: {}",
                    operation
                )));
            }
        }
        if !self.is_connected() {
            return Err(AppError::connection_lost("Mock客户端未连接"));
        }
        Ok(())
    }

    fn record_read(&self, success: bool) {
        let mut stats = self.stats.lock().unwrap();
        if success {
            stats.successful_reads += 1;
        } else {
            stats.failed_reads += 1;
        }
        stats.last_communication_time = Some(Utc::now());
    }

    fn record_write(&self, address: &str, value: Value, operation_type: &str) {
        self.write_log.lock().unwrap().push(WriteOperation {
            timestamp: Utc::now(),
            address: address.to_string(),
            value: value.clone(),
            operation_type: operation_type.to_string(),
        });
        self.data_storage
            .lock()
            .unwrap()
            .insert(address.to_string(), value);
        let mut stats = self.stats.lock().unwrap();
        stats.successful_writes += 1;
        stats.last_communication_time = Some(Utc::now());
    }

    fn stored_value(&self, address: &str) -> Option<Value> {
        self.data_storage.lock().unwrap().get(address).cloned()
    }
}

#[async_trait]
impl IPlcClient for MockPlcClient {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn connect(&self) -> AppResult<()> {
        if self.simulate_network_delay {
            sleep(Duration::from_millis(self.network_delay_ms)).await;
        }
        *self.connection_status.lock().unwrap() = PlcConnectionStatus::Connected;
        self.stats.lock().unwrap().connection_count += 1;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        *self.connection_status.lock().unwrap() = PlcConnectionStatus::Disconnected;
        Ok(())
    }

    fn connection_status(&self) -> PlcConnectionStatus {
        self.connection_status.lock().unwrap().clone()
    }

    async fn is_link_established(&self) -> AppResult<bool> {
        self.simulate_communication("is_link_established").await?;
        Ok(*self.link_established.lock().unwrap())
    }

    async fn is_device_ready(&self) -> AppResult<bool> {
        self.simulate_communication("is_device_ready").await?;
        Ok(*self.device_ready.lock().unwrap())
    }

    async fn read_bool(&self, address: &str) -> AppResult<bool> {
        if let Err(e) = self.simulate_communication("read_bool").await {
            self.record_read(false);
            return Err(e);
        }
        let value = match self.stored_value(address) {
            Some(Value::Bool(b)) => b,
            Some(other) => {
                self.record_read(false);
                return Err(AppError::plc_communication_error(format!(
                    "地址 {} 存储的不是布尔值: {}",
                    address, other
                )));
            }
            // 未预设的位地址默认读为 false
            None => false,
        };
        self.record_read(true);
        Ok(value)
    }

    async fn write_bool(&self, address: &str, value: bool) -> AppResult<()> {
        self.simulate_communication("write_bool").await?;
        self.record_write(address, Value::Bool(value), "write_bool");
        Ok(())
    }

    async fn read_u16(&self, address: &str) -> AppResult<u16> {
        if let Err(e) = self.simulate_communication("read_u16").await {
            self.record_read(false);
            return Err(e);
        }
        let value = match self.stored_value(address) {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u16::try_from(v).ok()).ok_or_else(
                || {
                    AppError::plc_communication_error(format!(
                        "地址 {} 的值超出字范围: {}",
                        address, n
                    ))
                },
            )?,
            Some(other) => {
                self.record_read(false);
                return Err(AppError::plc_communication_error(format!(
                    "地址 {} 存储的不是数值: {}",
                    address, other
                )));
            }
            // 未预设的字地址默认读为 0
            None => 0,
        };
        self.record_read(true);
        Ok(value)
    }

    async fn write_u16(&self, address: &str, value: u16) -> AppResult<()> {
        self.simulate_communication("write_u16").await?;
        self.record_write(address, Value::from(value), "write_u16");
        Ok(())
    }

    async fn read_u32(&self, address: &str) -> AppResult<u32> {
        if let Err(e) = self.simulate_communication("read_u32").await {
            self.record_read(false);
            return Err(e);
        }
        let value = match self.stored_value(address) {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(
                || {
                    AppError::plc_communication_error(format!(
                        "地址 {} 的值超出双字范围: {}",
                        address, n
                    ))
                },
            )?,
            Some(other) => {
                self.record_read(false);
                return Err(AppError::plc_communication_error(format!(
                    "地址 {} 存储的不是数值: {}",
                    address, other
                )));
            }
            None => 0,
        };
        self.record_read(true);
        Ok(value)
    }

    async fn write_u32(&self, address: &str, value: u32) -> AppResult<()> {
        self.simulate_communication("write_u32").await?;
        self.record_write(address, Value::from(value), "write_u32");
        Ok(())
    }

    async fn read_string(&self, address: &str) -> AppResult<String> {
        if let Err(e) = self.simulate_communication("read_string").await {
            self.record_read(false);
            return Err(e);
        }
        let value = match self.stored_value(address) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            // 未预设的字符寄存器默认读为 "0"
            None => "0".to_string(),
        };
        self.record_read(true);
        Ok(value)
    }

    fn communication_stats(&self) -> PlcCommunicationStats {
        self.stats.lock().unwrap().clone()
    }
}
