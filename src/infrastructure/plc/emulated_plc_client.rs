//! 仿真PLC客户端实现
//!
//! 通过基于行的文本协议与仿真PLC通信：
//! 请求 `READ <dev> <addr>` / `WRITE <dev> <addr> <val>`，
//! 响应 `OK <payload>` 或 `ERR <reason>`。
//! 布尔值在线路上编码为 1/0，链接与就绪标志使用
//! 设备级伪地址 `LINK` 和 `READY`。

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Duration;

use super::plc_client::{IPlcClient, PlcCommunicationStats, PlcConnectionStatus};
use crate::utils::error::{AppError, AppResult};

/// 仿真PLC客户端配置
#[derive(Debug, Clone)]
pub struct EmulatedPlcConfig {
    pub device_id: String,
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
}

impl Default for EmulatedPlcConfig {
    fn default() -> Self {
        Self {
            device_id: "D1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 10502,
            connect_timeout_ms: 2000,
            operation_timeout_ms: 1000,
        }
    }
}

/// 拆分后的连接读写半部
struct Transport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

pub struct EmulatedPlcClient {
    config: EmulatedPlcConfig,
    /// 传输层互斥锁，串行化同一连接上的全部读写
    transport: Arc<tokio::sync::Mutex<Option<Transport>>>,
    connection_status: Arc<Mutex<PlcConnectionStatus>>,
    stats: Arc<Mutex<PlcCommunicationStats>>,
}

impl EmulatedPlcClient {
    pub fn new(config: EmulatedPlcConfig) -> Self {
        Self {
            config,
            transport: Arc::new(tokio::sync::Mutex::new(None)),
            connection_status: Arc::new(Mutex::new(PlcConnectionStatus::Disconnected)),
            stats: Arc::new(Mutex::new(PlcCommunicationStats::default())),
        }
    }

    fn set_status(&self, status: PlcConnectionStatus) {
        *self.connection_status.lock().unwrap() = status;
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

    fn record_write(&self, success: bool) {
        let mut stats = self.stats.lock().unwrap();
        if success {
            stats.successful_writes += 1;
        } else {
            stats.failed_writes += 1;
        }
        stats.last_communication_time = Some(Utc::now());
    }

    /// 发送一行请求并等待一行响应
    /// 传输错误视为连接丢失，超时映射为超时错误
    async fn request(&self, line: String) -> AppResult<String> {
        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_lost("客户端未连接"))?;

        let io_result = tokio::time::timeout(
            Duration::from_millis(self.config.operation_timeout_ms),
            async {
                transport.writer.write_all(line.as_bytes()).await?;
                transport.writer.write_all(b"\n").await?;
                transport.writer.flush().await?;
                let mut response = String::new();
                let n = transport.reader.read_line(&mut response).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "对端关闭了连接",
                    ));
                }
                Ok(response)
            },
        )
        .await;

        let response = match io_result {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                guard.take();
                self.set_status(PlcConnectionStatus::Error(e.to_string()));
                return Err(AppError::connection_lost(format!("传输错误: {}", e)));
            }
            Err(_) => {
                return Err(AppError::timeout_error(
                    "plc_request",
                    format!("操作超时（{}ms）: {}", self.config.operation_timeout_ms, line),
                ));
            }
        };

        let response = response.trim_end().to_string();
        if let Some(payload) = response.strip_prefix("OK") {
            Ok(payload.trim_start().to_string())
        } else if let Some(reason) = response.strip_prefix("ERR") {
            Err(AppError::plc_communication_error(format!(
                "PLC返回错误: {}",
                reason.trim_start()
            )))
        } else {
            Err(AppError::plc_communication_error(format!(
                "无法解析的响应: {}",
                response
            )))
        }
    }

    async fn read_register(&self, address: &str) -> AppResult<String> {
        let result = self
            .request(format!("READ {} {}", self.config.device_id, address))
            .await;
        self.record_read(result.is_ok());
        result
    }

    async fn write_register(&self, address: &str, value: &str) -> AppResult<()> {
        let result = self
            .request(format!(
                "WRITE {} {} {}",
                self.config.device_id, address, value
            ))
            .await;
        self.record_write(result.is_ok());
        result.map(|_| ())
    }

    /// 读取设备级布尔伪地址（LINK / READY）
    async fn read_device_flag(&self, flag: &str) -> AppResult<bool> {
        let payload = self.read_register(flag).await?;
        parse_bool_payload(&payload)
    }
}

/// 解析线路上的布尔负载（1/0）
fn parse_bool_payload(payload: &str) -> AppResult<bool> {
    match payload {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(AppError::plc_communication_error(format!(
            "无效的布尔负载: {}",
            other
        ))),
    }
}

#[async_trait]
impl IPlcClient for EmulatedPlcClient {
    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    async fn connect(&self) -> AppResult<()> {
        {
            let status = self.connection_status.lock().unwrap();
            if matches!(
                *status,
                PlcConnectionStatus::Connected | PlcConnectionStatus::Connecting
            ) {
                return Ok(());
            }
        }
        self.set_status(PlcConnectionStatus::Connecting);

        let endpoint = format!("{}:{}", self.config.host, self.config.port);
        match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&endpoint),
        )
        .await
        {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                let (read_half, write_half) = stream.into_split();
                let mut guard = self.transport.lock().await;
                *guard = Some(Transport {
                    reader: BufReader::new(read_half),
                    writer: write_half,
                });
                self.set_status(PlcConnectionStatus::Connected);
                self.stats.lock().unwrap().connection_count += 1;
                info!("仿真PLC已连接: {} -> {}", self.config.device_id, endpoint);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_status(PlcConnectionStatus::Error(e.to_string()));
                Err(AppError::plc_communication_error(format!(
                    "连接失败 {}: {}",
                    endpoint, e
                )))
            }
            Err(_) => {
                self.set_status(PlcConnectionStatus::Error("连接超时".to_string()));
                Err(AppError::timeout_error(
                    "plc_connect",
                    format!("连接超时（{}ms）: {}", self.config.connect_timeout_ms, endpoint),
                ))
            }
        }
    }

    async fn disconnect(&self) -> AppResult<()> {
        let mut guard = self.transport.lock().await;
        if let Some(mut transport) = guard.take() {
            if let Err(e) = transport.writer.shutdown().await {
                warn!("关闭连接时出错: {}", e);
            }
        }
        self.set_status(PlcConnectionStatus::Disconnected);
        Ok(())
    }

    fn connection_status(&self) -> PlcConnectionStatus {
        self.connection_status.lock().unwrap().clone()
    }

    async fn is_link_established(&self) -> AppResult<bool> {
        self.read_device_flag("LINK").await
    }

    async fn is_device_ready(&self) -> AppResult<bool> {
        self.read_device_flag("READY").await
    }

    async fn read_bool(&self, address: &str) -> AppResult<bool> {
        let payload = self.read_register(address).await?;
        parse_bool_payload(&payload)
    }

    async fn write_bool(&self, address: &str, value: bool) -> AppResult<()> {
        self.write_register(address, if value { "1" } else { "0" })
            .await
    }

    async fn read_u16(&self, address: &str) -> AppResult<u16> {
        let payload = self.read_register(address).await?;
        payload
            .parse::<u16>()
            .map_err(|_| AppError::plc_communication_error(format!("无效的字负载: {}", payload)))
    }

    async fn write_u16(&self, address: &str, value: u16) -> AppResult<()> {
        self.write_register(address, &value.to_string()).await
    }

    async fn read_u32(&self, address: &str) -> AppResult<u32> {
        let payload = self.read_register(address).await?;
        payload
            .parse::<u32>()
            .map_err(|_| AppError::plc_communication_error(format!("无效的双字负载: {}", payload)))
    }

    async fn write_u32(&self, address: &str, value: u32) -> AppResult<()> {
        self.write_register(address, &value.to_string()).await
    }

    async fn read_string(&self, address: &str) -> AppResult<String> {
        self.read_register(address).await
    }

    fn communication_stats(&self) -> PlcCommunicationStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    /// 启动一个最小的行协议仿真PLC服务端，返回监听端口
    /// LINK/READY 伪地址初始为 1，其余寄存器按写入值应答
    async fn spawn_emulated_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut registers: HashMap<String, String> = HashMap::new();
            registers.insert("LINK".to_string(), "1".to_string());
            registers.insert("READY".to_string(), "1".to_string());

            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let parts: Vec<&str> = line.trim_end().split(' ').collect();
                let response = match parts.as_slice() {
                    ["READ", _dev, address] => match registers.get(*address) {
                        Some(value) => format!("OK {}\n", value),
                        None => "OK 0\n".to_string(),
                    },
                    ["WRITE", _dev, address, value] => {
                        registers.insert((*address).to_string(), (*value).to_string());
                        "OK\n".to_string()
                    }
                    _ => "ERR bad request\n".to_string(),
                };
                if write_half.write_all(response.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    /// 仿真客户端的连接、读写与设备级标志
    #[tokio::test]
    async fn test_emulated_client_round_trip() {
        let port = spawn_emulated_server().await;
        let client = EmulatedPlcClient::new(EmulatedPlcConfig {
            device_id: "D1".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout_ms: 2000,
            operation_timeout_ms: 1000,
        });

        assert_ok!(client.connect().await);
        assert!(client.is_connected());
        assert!(client.is_link_established().await.unwrap());
        assert!(client.is_device_ready().await.unwrap());

        assert_ok!(client.write_bool("DB1.DBX0.0", true).await);
        assert!(client.read_bool("DB1.DBX0.0").await.unwrap());

        assert_ok!(client.write_u16("DB1.DBW4", 15).await);
        assert_eq!(client.read_u16("DB1.DBW4").await.unwrap(), 15);

        assert_ok!(client.write_u32("DB1.DBD8", 70000).await);
        assert_eq!(client.read_u32("DB1.DBD8").await.unwrap(), 70000);

        // 未写入的寄存器应答 0
        assert_eq!(client.read_string("DB1.DBW30").await.unwrap(), "0");

        let stats = client.communication_stats();
        assert_eq!(stats.connection_count, 1);
        assert!(stats.successful_reads >= 4);
        assert!(stats.successful_writes >= 3);

        assert_ok!(client.disconnect().await);
        assert!(!client.is_connected());
    }

    /// 未连接时读写返回连接丢失错误
    #[tokio::test]
    async fn test_emulated_client_rejects_when_disconnected() {
        let client = EmulatedPlcClient::new(EmulatedPlcConfig::default());
        let err = client.read_bool("DB1.DBX0.0").await.unwrap_err();
        assert!(err.is_connection_error());
    }

    /// 连接失败时返回错误并进入错误状态
    #[tokio::test]
    async fn test_emulated_client_connect_refused() {
        let client = EmulatedPlcClient::new(EmulatedPlcConfig {
            device_id: "D1".to_string(),
            host: "127.0.0.1".to_string(),
            // 未监听的端口
            port: 1,
            connect_timeout_ms: 500,
            operation_timeout_ms: 500,
        });
        assert!(client.connect().await.is_err());
        assert!(matches!(
            client.connection_status(),
            PlcConnectionStatus::Error(_)
        ));
    }
}
