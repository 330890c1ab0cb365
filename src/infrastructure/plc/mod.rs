//! PLC通信基础设施
//!
//! 包含PLC客户端接口、地址解析、信号地址模板，
//! 以及仿真与Mock两种客户端实现。
//! 真实的S7二进制传输由外部协作方提供，核心只依赖 `IPlcClient` 接口。

pub mod address;
pub mod emulated_plc_client;
pub mod mock_plc_client;
pub mod plc_client;
pub mod signal_map;

mod tests;

pub use address::{parse_address, AddressArea, PlcAddress};
pub use emulated_plc_client::{EmulatedPlcClient, EmulatedPlcConfig};
pub use mock_plc_client::{MockPlcClient, WriteOperation};
pub use plc_client::{IPlcClient, PlcCommunicationStats, PlcConnectionStatus};
pub use signal_map::{SignalMap, SignalMapTemplate, BARCODE_REGISTER_COUNT};
