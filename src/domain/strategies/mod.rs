//! 任务策略实现
//!
//! 每种任务类型一个策略结构体，统一实现 `ICommandStrategy` 接口。
//! 策略以任务类型为键注册到工位执行器。

pub mod command_strategies;
pub mod inbound_strategy;

pub use command_strategies::{CheckPalletStrategy, OutboundStrategy, TransferStrategy};
pub use inbound_strategy::InboundStrategy;

use crate::domain::services::ICommandStrategy;
use crate::models::CommandType;
use std::collections::HashMap;
use std::sync::Arc;

/// 构建包含全部任务类型的策略注册表
pub fn default_strategies() -> HashMap<CommandType, Arc<dyn ICommandStrategy>> {
    let mut strategies: HashMap<CommandType, Arc<dyn ICommandStrategy>> = HashMap::new();
    strategies.insert(CommandType::Inbound, Arc::new(InboundStrategy::new()));
    strategies.insert(CommandType::Outbound, Arc::new(OutboundStrategy));
    strategies.insert(CommandType::Transfer, Arc::new(TransferStrategy));
    strategies.insert(CommandType::CheckPallet, Arc::new(CheckPalletStrategy));
    strategies
}
