//! 基础设施层
//!
//! 提供PLC通信客户端及相关工具，核心域层只通过接口与本层交互。

pub mod plc;

pub use plc::{
    EmulatedPlcClient, EmulatedPlcConfig, IPlcClient, MockPlcClient, PlcCommunicationStats,
    PlcConnectionStatus, SignalMap, SignalMapTemplate,
};
