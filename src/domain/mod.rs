//! 核心域层
//!
//! 调度与执行引擎的全部构件：任务策略、信号监视器、工位执行器、
//! 调度器、任务跟踪器、应答中心以及通道与门闩原语。

pub mod channels;
pub mod command_tracker;
pub mod matchmaker;
pub mod reply_hub;
pub mod services;
pub mod signal_monitor;
pub mod slot_worker;
pub mod strategies;

pub use channels::{EventBus, PauseGate};
pub use command_tracker::CommandTracker;
pub use matchmaker::{Matchmaker, SlotHandle, DISPATCH_STAGGER};
pub use reply_hub::ReplyHub;
pub use services::{
    AcceptAllLayoutValidator, ExecutionContext, FnBarcodeValidator, IBarcodeValidator,
    ICommandStrategy, ILayoutValidator,
};
pub use signal_monitor::{MonitorOutcome, MonitorSignal, SignalMonitor, MONITOR_POLL_INTERVAL};
pub use slot_worker::{SlotWorker, WorkerContext, SUCCESS_COOLDOWN};
pub use strategies::{
    default_strategies, CheckPalletStrategy, InboundStrategy, OutboundStrategy, TransferStrategy,
};
