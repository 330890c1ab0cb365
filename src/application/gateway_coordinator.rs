//! # 网关协调器
//!
//! ## 业务说明
//! 核心编排服务，对外暴露网关的全部公共API：
//! 设备与工位注册、任务提交与移除、启动与停止、
//! 暂停与恢复、故障恢复触发、状态查询与结果订阅。
//!
//! ## 所有权
//! 协调器独占通道、任务跟踪器、门闩与执行器集合；
//! 每个工位执行器独占自己的信箱读端与在执行任务。
//!
//! ## 协调机制
//! - **异步协调**: 调度器、应答中心、各工位执行器各为一个tokio任务
//! - **消息传递**: 有界输入队列背压提交方，结果经专用通道汇聚
//! - **取消传播**: 关闭令牌从协调器流向全部执行器、策略与监视器

use crate::domain::channels::{
    EventBus, PauseGate, INPUT_QUEUE_CAPACITY, RESULT_CHANNEL_CAPACITY, SLOT_MAILBOX_CAPACITY,
};
use crate::domain::command_tracker::{CommandTracker, CLEANUP_INTERVAL};
use crate::domain::matchmaker::{build_slot_registry, Matchmaker, SlotHandle};
use crate::domain::reply_hub::ReplyHub;
use crate::domain::services::{
    AcceptAllLayoutValidator, FnBarcodeValidator, IBarcodeValidator, ICommandStrategy,
    ILayoutValidator,
};
use crate::domain::slot_worker::{SlotWorker, WorkerContext};
use crate::domain::strategies::default_strategies;
use crate::infrastructure::plc::{IPlcClient, SignalMap, SignalMapTemplate};
use crate::models::{
    BarcodeValidationRequest, BarcodeValidationResponse, CommandEnvelope, CommandResult,
    CommandType, GatewayStatus, Location, ReadyTicket, ResultNotification, SlotConfiguration,
};
use crate::utils::config::DeviceOptions;
use crate::utils::error::{AppError, AppResult};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 注册完成的工位运行时信息
struct SlotRuntime {
    configuration: SlotConfiguration,
    map: SignalMap,
    recovery_notify: Arc<Notify>,
}

/// 注册完成的设备运行时信息
struct DeviceRuntime {
    client: Arc<dyn IPlcClient>,
    options: DeviceOptions,
    slots: Vec<SlotRuntime>,
}

/// 提交回滚守卫
/// 提交在写入输入队列前被取消时，从跟踪器中撤销登记
struct PendingGuard<'a> {
    tracker: &'a CommandTracker,
    command_id: &'a str,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.discard(self.command_id);
        }
    }
}

/// 网关协调器
pub struct GatewayCoordinator {
    tracker: Arc<CommandTracker>,
    bus: Arc<EventBus>,
    pause_gate: Arc<PauseGate>,
    shutdown: CancellationToken,
    input_tx: mpsc::Sender<CommandEnvelope>,
    input_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    ready_tx: mpsc::UnboundedSender<ReadyTicket>,
    ready_rx: Mutex<Option<mpsc::UnboundedReceiver<ReadyTicket>>>,
    result_tx: mpsc::Sender<CommandResult>,
    result_rx: Mutex<Option<mpsc::Receiver<CommandResult>>>,
    devices: Mutex<HashMap<String, DeviceRuntime>>,
    /// 信号地址模板，注册时与各工位的数据块号绑定
    signal_template: SignalMapTemplate,
    barcode_validator: Arc<std::sync::RwLock<Option<Arc<dyn IBarcodeValidator>>>>,
    layout_validator: std::sync::RwLock<Arc<dyn ILayoutValidator>>,
    /// 提交时同步验证用的策略注册表
    validation_strategies: HashMap<CommandType, Arc<dyn ICommandStrategy>>,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayCoordinator {
    pub fn new() -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        Self {
            tracker: Arc::new(CommandTracker::new()),
            bus: Arc::new(EventBus::new()),
            pause_gate: Arc::new(PauseGate::new(true)),
            shutdown: CancellationToken::new(),
            input_tx,
            input_rx: Mutex::new(Some(input_rx)),
            ready_tx,
            ready_rx: Mutex::new(Some(ready_rx)),
            result_tx,
            result_rx: Mutex::new(Some(result_rx)),
            devices: Mutex::new(HashMap::new()),
            signal_template: SignalMapTemplate::default(),
            barcode_validator: Arc::new(std::sync::RwLock::new(None)),
            layout_validator: std::sync::RwLock::new(Arc::new(AcceptAllLayoutValidator)),
            validation_strategies: default_strategies(),
            started: AtomicBool::new(false),
            task_handles: Mutex::new(Vec::new()),
        }
    }

    /// 注册设备及其工位，仅允许在启动前调用
    /// 同一设备ID重复注册以最后一次为准
    pub fn register_device(
        &self,
        client: Arc<dyn IPlcClient>,
        options: DeviceOptions,
        slots: Vec<SlotConfiguration>,
    ) -> AppResult<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(AppError::configuration_error("网关启动后不允许注册设备"));
        }
        options.validate()?;
        if slots.is_empty() {
            return Err(AppError::configuration_error(format!(
                "设备 {} 未配置任何工位",
                options.device_id
            )));
        }

        let mut slot_ids = HashSet::new();
        let mut db_numbers = HashSet::new();
        let mut runtimes = Vec::new();
        for configuration in slots {
            if configuration.slot_id == 0 {
                return Err(AppError::configuration_error("工位ID必须大于0"));
            }
            if !slot_ids.insert(configuration.slot_id) {
                return Err(AppError::configuration_error(format!(
                    "工位ID重复: {}",
                    configuration.slot_id
                )));
            }
            if !db_numbers.insert(configuration.db_number) {
                return Err(AppError::configuration_error(format!(
                    "数据块号重复: {}",
                    configuration.db_number
                )));
            }
            let map = self.signal_template.bind(configuration.db_number)?;
            runtimes.push(SlotRuntime {
                configuration,
                map,
                recovery_notify: Arc::new(Notify::new()),
            });
        }

        let device_id = options.device_id.clone();
        let mut devices = self.devices.lock().unwrap();
        if devices
            .insert(
                device_id.clone(),
                DeviceRuntime {
                    client,
                    options,
                    slots: runtimes,
                },
            )
            .is_some()
        {
            warn!("设备重复注册，覆盖原有配置: {}", device_id);
        }
        info!("🔌 设备已注册: {}", device_id);
        Ok(())
    }

    /// 安装条码验证协作方，必须先于任何入库任务提交
    pub fn set_barcode_validator(&self, validator: Arc<dyn IBarcodeValidator>) {
        *self.barcode_validator.write().unwrap() = Some(validator);
    }

    /// 以异步闭包形式安装条码验证协作方
    pub fn set_barcode_validator_fn<F, Fut>(&self, func: F)
    where
        F: Fn(BarcodeValidationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<BarcodeValidationResponse>> + Send + 'static,
    {
        self.set_barcode_validator(Arc::new(FnBarcodeValidator::new(func)));
    }

    /// 安装仓库布局协作方
    pub fn set_layout_validator(&self, validator: Arc<dyn ILayoutValidator>) {
        *self.layout_validator.write().unwrap() = validator;
    }

    /// 启动网关：调度器、应答中心与全部工位执行器
    pub async fn start(&self) -> AppResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AppError::concurrency_error("网关已启动"));
        }

        let input_rx = self
            .input_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::concurrency_error("输入通道已被占用"))?;
        let ready_rx = self
            .ready_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::concurrency_error("就绪通道已被占用"))?;
        let result_rx = self
            .result_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::concurrency_error("结果通道已被占用"))?;

        let mut handles = Vec::new();
        let mut slot_handles = Vec::new();

        {
            let devices = self.devices.lock().unwrap();
            if devices.is_empty() {
                warn!("未注册任何设备，网关以空配置启动");
            }

            let worker_context = WorkerContext {
                tracker: self.tracker.clone(),
                ready_tx: self.ready_tx.clone(),
                result_tx: self.result_tx.clone(),
                barcode_validator: self.barcode_validator.clone(),
                shutdown: self.shutdown.clone(),
            };

            for (device_id, runtime) in devices.iter() {
                for slot in &runtime.slots {
                    let (mailbox_tx, mailbox_rx) = mpsc::channel(SLOT_MAILBOX_CAPACITY);
                    slot_handles.push(SlotHandle {
                        device_id: device_id.clone(),
                        slot_id: slot.configuration.slot_id,
                        capabilities: slot.configuration.capabilities.clone(),
                        mailbox_tx,
                    });

                    let worker = SlotWorker::new(
                        device_id.clone(),
                        slot.configuration.slot_id,
                        runtime.client.clone(),
                        slot.map.clone(),
                        runtime.options.clone(),
                        mailbox_rx,
                        slot.recovery_notify.clone(),
                        worker_context.clone(),
                    );
                    handles.push(tokio::spawn(worker.run()));
                }
            }
        }

        // 尝试建立各设备连接；失败交由传输层的重连机制处理
        let clients: Vec<(String, Arc<dyn IPlcClient>)> = {
            let devices = self.devices.lock().unwrap();
            devices
                .iter()
                .map(|(device_id, runtime)| (device_id.clone(), runtime.client.clone()))
                .collect()
        };
        for (device_id, client) in clients {
            if let Err(e) = client.connect().await {
                warn!("设备连接失败，等待传输层重连: {} - {}", device_id, e);
            }
        }

        let matchmaker = Matchmaker::new(
            input_rx,
            ready_rx,
            self.ready_tx.clone(),
            build_slot_registry(slot_handles),
            self.tracker.clone(),
            self.pause_gate.clone(),
            self.shutdown.clone(),
        );
        handles.push(tokio::spawn(matchmaker.run()));

        let reply_hub = ReplyHub::new(
            result_rx,
            self.tracker.clone(),
            self.bus.clone(),
            self.shutdown.clone(),
        );
        handles.push(tokio::spawn(reply_hub.run()));

        // 跟踪器定期清理任务
        {
            let tracker = self.tracker.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(CLEANUP_INTERVAL) => tracker.cleanup(),
                    }
                }
            }));
        }

        self.task_handles.lock().unwrap().extend(handles);
        self.pause_gate.set();
        info!("✅ 网关已启动");
        Ok(())
    }

    /// 优雅停止：发出关闭信号并等待全部任务退出
    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        info!("🛑 网关关闭中...");
        self.shutdown.cancel();
        // 唤醒可能停在暂停门上的调度器
        self.pause_gate.set();

        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().unwrap().drain(..).collect();
        futures::future::join_all(handles).await;
        info!("🛑 网关已停止");
    }

    /// 提交任务
    /// 返回 `Ok(true)` 表示入队成功，`Ok(false)` 表示网关正在关闭；
    /// 配置、验证与未初始化错误同步返回提交方
    pub async fn submit(&self, envelope: CommandEnvelope) -> AppResult<bool> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(AppError::not_initialized_error(
                "GatewayCoordinator",
                "网关尚未启动",
            ));
        }
        if self.shutdown.is_cancelled() {
            return Ok(false);
        }

        // 同步验证：策略校验任务类型与库位组合
        let strategy = self
            .validation_strategies
            .get(&envelope.command_type)
            .ok_or_else(|| {
                AppError::validation_error(format!("不支持的任务类型: {}", envelope.command_type))
            })?;
        strategy.validate(&envelope)?;

        // 入库任务要求条码验证协作方已安装
        if envelope.command_type == CommandType::Inbound
            && self.barcode_validator.read().unwrap().is_none()
        {
            return Err(AppError::not_initialized_error(
                "GatewayCoordinator",
                "条码验证协作方未安装，无法提交入库任务",
            ));
        }

        // 库位合法性交由外部布局协作方校验
        let layout_validator = self.layout_validator.read().unwrap().clone();
        if let Some(source) = &envelope.source {
            layout_validator.validate_location(source).await?;
        }
        if let Some(destination) = &envelope.destination {
            layout_validator.validate_location(destination).await?;
        }

        // 设备亲和提示必须指向已注册设备
        if let Some(device_id) = &envelope.device_id {
            if !self.devices.lock().unwrap().contains_key(device_id) {
                return Err(AppError::validation_error(format!(
                    "未注册的设备: {}",
                    device_id
                )));
            }
        }

        let command_id = envelope.command_id.clone();
        self.tracker.mark_pending(envelope.clone())?;
        // 写入输入队列前被取消的提交从跟踪器撤销登记
        let guard = PendingGuard {
            tracker: &self.tracker,
            command_id: &command_id,
            armed: true,
        };

        if self.input_tx.send(envelope).await.is_err() {
            // guard 析构时撤销登记
            return Ok(false);
        }
        guard.disarm();

        // 新提交自动置位暂停门（到达即唤醒调度器）
        self.pause_gate.set();
        info!("📥 任务已提交: {}", command_id);
        Ok(true)
    }

    /// 暂停调度（不影响执行中的任务）
    /// 暂停期间的新提交只唤醒调度器，不会恢复派发
    pub fn pause(&self) {
        self.pause_gate.hold();
        info!("⏸ 调度已暂停");
    }

    /// 恢复调度
    pub fn resume(&self) {
        self.pause_gate.release();
        self.pause_gate.set();
        info!("▶️ 调度已恢复");
    }

    /// 是否处于手动暂停状态
    pub fn is_paused(&self) -> bool {
        self.pause_gate.is_held()
    }

    /// 软删除任务，仅在 Pending 状态下生效
    pub fn remove(&self, command_id: &str) -> AppResult<bool> {
        let removed = self.tracker.mark_removed(command_id)?;
        if removed {
            info!("🗑 任务已移除: {}", command_id);
        }
        Ok(removed)
    }

    /// 触发设备全部工位的手动恢复检查
    pub fn trigger_device_recovery(&self, device_id: &str) -> AppResult<()> {
        let devices = self.devices.lock().unwrap();
        let runtime = devices
            .get(device_id)
            .ok_or_else(|| AppError::not_found_error("Device", device_id))?;
        for slot in &runtime.slots {
            slot.recovery_notify.notify_waiters();
        }
        info!("🔔 已触发设备恢复: {}", device_id);
        Ok(())
    }

    /// 触发单个工位的手动恢复检查
    pub fn trigger_slot_recovery(&self, device_id: &str, slot_id: u16) -> AppResult<()> {
        let devices = self.devices.lock().unwrap();
        let runtime = devices
            .get(device_id)
            .ok_or_else(|| AppError::not_found_error("Device", device_id))?;
        let slot = runtime
            .slots
            .iter()
            .find(|slot| slot.configuration.slot_id == slot_id)
            .ok_or_else(|| {
                AppError::not_found_error("Slot", format!("{}-{}", device_id, slot_id))
            })?;
        slot.recovery_notify.notify_waiters();
        info!("🔔 已触发工位恢复: {}-{}", device_id, slot_id);
        Ok(())
    }

    /// 读取设备当前位置（四个位置寄存器）
    /// 未指定工位时使用设备的首个工位
    pub async fn read_current_location(
        &self,
        device_id: &str,
        slot_id: Option<u16>,
    ) -> AppResult<Location> {
        let (client, map) = {
            let devices = self.devices.lock().unwrap();
            let runtime = devices
                .get(device_id)
                .ok_or_else(|| AppError::not_found_error("Device", device_id))?;
            let slot = match slot_id {
                Some(slot_id) => runtime
                    .slots
                    .iter()
                    .find(|slot| slot.configuration.slot_id == slot_id)
                    .ok_or_else(|| {
                        AppError::not_found_error("Slot", format!("{}-{}", device_id, slot_id))
                    })?,
                None => runtime.slots.first().ok_or_else(|| {
                    AppError::not_found_error("Slot", format!("{} 无可用工位", device_id))
                })?,
            };
            (runtime.client.clone(), slot.map.clone())
        };

        let floor = client.read_u16(&map.position_floor).await?;
        let rail = client.read_u16(&map.position_rail).await?;
        let block = client.read_u16(&map.position_block).await?;
        let depth = client.read_u16(&map.position_depth).await?;
        Ok(Location {
            floor,
            rail,
            block,
            depth,
        })
    }

    /// 网关状态快照
    pub fn status(&self) -> GatewayStatus {
        let (queued, processing, completed) = self.tracker.counts();
        GatewayStatus {
            queued,
            processing,
            completed,
            paused: self.is_paused(),
            device_statistics: self.tracker.device_statistics(),
        }
    }

    /// 订阅结果通知流（惰性、多订阅者）
    pub fn observe_results(&self) -> mpsc::UnboundedReceiver<ResultNotification> {
        self.bus.subscribe()
    }

    /// 任务跟踪器只读访问（诊断用途）
    pub fn tracker(&self) -> &CommandTracker {
        &self.tracker
    }
}

impl Default for GatewayCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::plc::MockPlcClient;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        LayoutValidator {}

        #[async_trait::async_trait]
        impl ILayoutValidator for LayoutValidator {
            async fn validate_location(&self, location: &Location) -> AppResult<()>;
        }
    }

    fn registered_coordinator() -> GatewayCoordinator {
        let coordinator = GatewayCoordinator::new();
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        coordinator
            .register_device(
                client as Arc<dyn IPlcClient>,
                DeviceOptions::new("D1"),
                vec![SlotConfiguration::new(1, 1)],
            )
            .unwrap();
        coordinator
    }

    /// 未启动时提交返回未初始化错误
    #[tokio::test]
    async fn test_submit_before_start_rejected() {
        let coordinator = registered_coordinator();
        let envelope = CommandEnvelope::new("T1", CommandType::Outbound)
            .with_source(Location::new(1, 1, 1));
        assert!(matches!(
            coordinator.submit(envelope).await,
            Err(AppError::NotInitializedError { .. })
        ));
    }

    /// 条码验证协作方未安装时拒绝入库提交
    #[tokio::test]
    async fn test_inbound_requires_barcode_validator() {
        let coordinator = registered_coordinator();
        coordinator.start().await.unwrap();

        let envelope = CommandEnvelope::new("T1", CommandType::Inbound);
        assert!(matches!(
            coordinator.submit(envelope).await,
            Err(AppError::NotInitializedError { .. })
        ));
        coordinator.stop().await;
    }

    /// 库位合法性由外部布局协作方裁决
    #[tokio::test]
    async fn test_layout_validator_rejects_submission() {
        let coordinator = registered_coordinator();

        let mut layout = MockLayoutValidator::new();
        layout
            .expect_validate_location()
            .with(always())
            .returning(|location| {
                if location.floor > 3 {
                    Err(AppError::validation_error("库位不存在"))
                } else {
                    Ok(())
                }
            });
        coordinator.set_layout_validator(Arc::new(layout));
        coordinator.start().await.unwrap();
        coordinator.pause();

        // 合法库位通过
        let valid = CommandEnvelope::new("T1", CommandType::Outbound)
            .with_source(Location::new(1, 1, 1));
        assert!(coordinator.submit(valid).await.unwrap());

        // 非法库位被拒绝，且不会登记到跟踪器
        let invalid = CommandEnvelope::new("T2", CommandType::Outbound)
            .with_source(Location::new(9, 1, 1));
        assert!(coordinator.submit(invalid).await.is_err());
        assert!(coordinator.tracker().state("T2").is_none());

        coordinator.stop().await;
    }

    /// 启动后注册设备被拒绝，重复启动被拒绝
    #[tokio::test]
    async fn test_register_and_start_guards() {
        let coordinator = registered_coordinator();
        coordinator.start().await.unwrap();

        let client = Arc::new(MockPlcClient::new_for_testing("D2"));
        assert!(coordinator
            .register_device(
                client as Arc<dyn IPlcClient>,
                DeviceOptions::new("D2"),
                vec![SlotConfiguration::new(1, 1)],
            )
            .is_err());
        assert!(coordinator.start().await.is_err());

        coordinator.stop().await;
    }

    /// 工位配置冲突在注册时被拒绝
    #[tokio::test]
    async fn test_register_rejects_conflicting_slots() {
        let coordinator = GatewayCoordinator::new();
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        let result = coordinator.register_device(
            client as Arc<dyn IPlcClient>,
            DeviceOptions::new("D1"),
            vec![SlotConfiguration::new(1, 1), SlotConfiguration::new(2, 1)],
        );
        assert!(matches!(result, Err(AppError::ConfigurationError { .. })));
    }
}
