//! 应用层
//!
//! 对外暴露网关公共API的编排服务。

pub mod gateway_coordinator;

pub use gateway_coordinator::GatewayCoordinator;
