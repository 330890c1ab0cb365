//! PLC客户端接口定义及相关数据结构

use crate::utils::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// PLC连接状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlcConnectionStatus {
    /// 已断开
    Disconnected,
    /// 连接中
    Connecting,
    /// 已连接
    Connected,
    /// 连接错误
    Error(String),
}

/// PLC通信统计信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlcCommunicationStats {
    /// 连接建立次数
    pub connection_count: u64,
    /// 成功读取次数
    pub successful_reads: u64,
    /// 失败读取次数
    pub failed_reads: u64,
    /// 成功写入次数
    pub successful_writes: u64,
    /// 失败写入次数
    pub failed_writes: u64,
    /// 最后一次通信时间
    pub last_communication_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// PLC客户端接口
/// 这是所有PLC传输实现必须遵循的接口规范
///
/// 一个客户端对应一条物理连接，同一设备的全部工位共享该连接；
/// 实现必须用单把互斥锁串行化同一连接上的并发读写。
/// 异步trait对象无法携带泛型读写方法，按类型拆分为具体方法。
#[async_trait]
pub trait IPlcClient: Send + Sync {
    /// 返回客户端对应的设备ID
    fn device_id(&self) -> &str;

    /// 建立与PLC的通信连接
    async fn connect(&self) -> AppResult<()>;

    /// 安全关闭与PLC的连接
    async fn disconnect(&self) -> AppResult<()>;

    /// 检查传输层连接状态
    fn connection_status(&self) -> PlcConnectionStatus;

    /// 简化的连接状态检查
    fn is_connected(&self) -> bool {
        matches!(self.connection_status(), PlcConnectionStatus::Connected)
    }

    /// 检查PLC程序是否已建立软件链接
    /// 由PLC程序置位，传输连接正常不代表PLC程序在运行
    async fn is_link_established(&self) -> AppResult<bool>;

    /// 检查设备是否就绪可接收任务
    async fn is_device_ready(&self) -> AppResult<bool>;

    /// 读取布尔值（位地址）
    async fn read_bool(&self, address: &str) -> AppResult<bool>;

    /// 写入布尔值（位地址）
    async fn write_bool(&self, address: &str, value: bool) -> AppResult<()>;

    /// 读取16位无符号整数（字地址，大端）
    async fn read_u16(&self, address: &str) -> AppResult<u16>;

    /// 写入16位无符号整数（字地址，大端）
    async fn write_u16(&self, address: &str, value: u16) -> AppResult<()>;

    /// 读取32位无符号整数（双字地址，大端）
    async fn read_u32(&self, address: &str) -> AppResult<u32>;

    /// 写入32位无符号整数（双字地址，大端）
    async fn write_u32(&self, address: &str, value: u32) -> AppResult<()>;

    /// 读取字符串寄存器
    /// 条码寄存器每次读取产生一个单字符字符串
    async fn read_string(&self, address: &str) -> AppResult<String>;

    /// 获取通信统计信息
    fn communication_stats(&self) -> PlcCommunicationStats;
}
