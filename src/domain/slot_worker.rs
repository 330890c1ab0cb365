//! 工位执行器
//!
//! 每个工位一个执行器任务，独占容量为1的信箱。
//! 启动时宣告就绪，随后循环：收取任务、执行、发布结果，
//! 再根据结果决定重新宣告就绪或进入故障恢复。
//!
//! 执行分四道守卫与两个并行阶段：
//! 1. 软件链接检查（失败不进入恢复，问题在PLC程序而非设备）
//! 2. 限时等待设备就绪
//! 3. 信号监视器与步骤流程并行，先结束者胜出并取消另一方
//! 4. 收敛监视器后组装终态结果
//!
//! 失败/超时/取消的结果发布前必须先设置设备故障门，
//! 关闭与调度器之间的派发竞争。

use crate::domain::command_tracker::CommandTracker;
use crate::domain::services::{ExecutionContext, IBarcodeValidator, ICommandStrategy};
use crate::domain::signal_monitor::{MonitorOutcome, MonitorSignal, SignalMonitor};
use crate::domain::strategies::default_strategies;
use crate::infrastructure::plc::{IPlcClient, SignalMap};
use crate::models::{
    CommandEnvelope, CommandResult, CommandType, ErrorDetail, ExecutionStatus, ExecutionStep,
    ReadyTicket, RecoveryMode,
};
use crate::utils::config::DeviceOptions;
use crate::utils::error::AppResult;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// 设备就绪轮询间隔
pub const DEVICE_READY_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// 成功后的冷却时长
pub const SUCCESS_COOLDOWN: Duration = Duration::from_secs(5);

/// 工位执行器共享上下文
/// 同一网关实例的全部执行器共享这组句柄
#[derive(Clone)]
pub struct WorkerContext {
    pub tracker: Arc<CommandTracker>,
    pub ready_tx: mpsc::UnboundedSender<ReadyTicket>,
    pub result_tx: mpsc::Sender<CommandResult>,
    pub barcode_validator: Arc<std::sync::RwLock<Option<Arc<dyn IBarcodeValidator>>>>,
    pub shutdown: CancellationToken,
}

/// 工位执行器
pub struct SlotWorker {
    device_id: String,
    slot_id: u16,
    client: Arc<dyn IPlcClient>,
    map: SignalMap,
    options: DeviceOptions,
    /// 策略注册表为工位私有：入库策略持有单次使用状态，
    /// 同一工位上的任务严格串行执行
    strategies: HashMap<CommandType, Arc<dyn ICommandStrategy>>,
    mailbox_rx: mpsc::Receiver<CommandEnvelope>,
    recovery_notify: Arc<Notify>,
    context: WorkerContext,
}

impl SlotWorker {
    pub fn new(
        device_id: impl Into<String>,
        slot_id: u16,
        client: Arc<dyn IPlcClient>,
        map: SignalMap,
        options: DeviceOptions,
        mailbox_rx: mpsc::Receiver<CommandEnvelope>,
        recovery_notify: Arc<Notify>,
        context: WorkerContext,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            slot_id,
            client,
            map,
            options,
            strategies: default_strategies(),
            mailbox_rx,
            recovery_notify,
            context,
        }
    }

    /// 执行器主循环
    pub async fn run(mut self) {
        info!("🔧 工位执行器已启动: {}-{}", self.device_id, self.slot_id);
        self.announce_ready();

        loop {
            let envelope = tokio::select! {
                _ = self.context.shutdown.cancelled() => break,
                maybe = self.mailbox_rx.recv() => match maybe {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let (result, enter_recovery) = self.execute(envelope).await;
            let status = result.status;

            // 设备故障门必须先于失败结果发布
            if enter_recovery {
                self.context.tracker.set_device_error(
                    &self.device_id,
                    self.slot_id,
                    result.message.clone(),
                    result.error.as_ref().map(|error| error.code),
                );
            }
            if self.context.result_tx.send(result).await.is_err() {
                warn!("结果通道已关闭: {}-{}", self.device_id, self.slot_id);
                break;
            }

            match status {
                ExecutionStatus::Success | ExecutionStatus::Warning => {
                    if !self.cooldown().await {
                        break;
                    }
                    self.announce_ready();
                }
                _ if enter_recovery => {
                    if self.context.shutdown.is_cancelled() {
                        break;
                    }
                    self.recover().await;
                }
                _ => {
                    // 不进入恢复的失败（如软件链接未建立）：冷却后直接重新宣告
                    if !self.cooldown().await {
                        break;
                    }
                    self.announce_ready();
                }
            }
        }
        info!("🔧 工位执行器已停止: {}-{}", self.device_id, self.slot_id);
    }

    /// 发出一张就绪凭据
    fn announce_ready(&self) {
        let (pending, _, _) = self.context.tracker.counts();
        let ticket = ReadyTicket {
            device_id: self.device_id.clone(),
            slot_id: self.slot_id,
            ready_at: Utc::now(),
            queue_depth: pending,
        };
        if self.context.ready_tx.send(ticket).is_err() {
            warn!("就绪通道已关闭: {}-{}", self.device_id, self.slot_id);
        } else {
            debug!("🎫 工位已就绪: {}-{}", self.device_id, self.slot_id);
        }
    }

    /// 成功后的冷却等待，关闭时返回 false
    async fn cooldown(&self) -> bool {
        tokio::select! {
            _ = self.context.shutdown.cancelled() => false,
            _ = sleep(SUCCESS_COOLDOWN) => true,
        }
    }

    /// 执行单个任务，返回终态结果及是否进入恢复流程
    async fn execute(&mut self, envelope: CommandEnvelope) -> (CommandResult, bool) {
        let started_at = Utc::now();
        info!(
            "🚀 开始执行任务: {} ({}) [{}-{}]",
            envelope.command_id, envelope.command_type, self.device_id, self.slot_id
        );

        // 守卫1: PLC程序软件链接
        match self.client.is_link_established().await {
            Ok(true) => {}
            Ok(false) => {
                // 问题在PLC程序而非设备，不进入恢复
                let mut result = CommandResult::failure(
                    &envelope.command_id,
                    &self.device_id,
                    self.slot_id,
                    "PLC程序未建立软件链接，任务无法执行",
                );
                result.started_at = started_at;
                return (result, false);
            }
            Err(e) => {
                let error = ErrorDetail::from_exception(&e);
                let mut result = CommandResult::failure(
                    &envelope.command_id,
                    &self.device_id,
                    self.slot_id,
                    format!("软件链接检查失败: {}", e),
                )
                .with_error(error);
                result.started_at = started_at;
                return (result, true);
            }
        }

        // 守卫2: 限时等待设备就绪
        if !self.wait_device_ready().await {
            let mut result = CommandResult::new(
                &envelope.command_id,
                &self.device_id,
                self.slot_id,
                ExecutionStatus::Timeout,
                format!(
                    "等待设备就绪超时（{}毫秒）",
                    self.options.command_timeout_ms
                ),
            );
            result.started_at = started_at;
            return (result, true);
        }

        // 守卫3: 策略选择
        let Some(strategy) = self.strategies.get(&envelope.command_type).cloned() else {
            let mut result = CommandResult::failure(
                &envelope.command_id,
                &self.device_id,
                self.slot_id,
                format!("工位未注册任务类型 {} 的策略", envelope.command_type),
            );
            result.started_at = started_at;
            return (result, false);
        };

        // 阶段: 信号监视器与步骤流程并行
        let fail_on_alarm = self.options.fail_on_alarm || strategy.fail_on_alarm_override();
        let exec_token = self.context.shutdown.child_token();
        let shared_steps: Arc<Mutex<Vec<ExecutionStep>>> = Arc::new(Mutex::new(Vec::new()));

        let monitor = SignalMonitor::new(
            self.client.clone(),
            self.map.clone(),
            strategy.completion_address(&self.map).to_string(),
            fail_on_alarm,
            envelope.command_id.clone(),
            self.device_id.clone(),
            self.slot_id,
            self.context.result_tx.clone(),
            exec_token.child_token(),
        );
        let mut monitor_handle = tokio::spawn(monitor.run());

        let barcode_validator = self.context.barcode_validator.read().unwrap().clone();
        let step_future = Self::run_steps(
            strategy.clone(),
            self.client.clone(),
            self.map.clone(),
            envelope.clone(),
            self.device_id.clone(),
            self.slot_id,
            exec_token.clone(),
            barcode_validator,
            shared_steps.clone(),
        );
        tokio::pin!(step_future);

        let deadline = sleep(self.options.command_timeout());
        tokio::pin!(deadline);

        // 先结束者胜出；监视器的结论优先于步骤流程
        let (mut result, enter_recovery) = tokio::select! {
            biased;
            _ = self.context.shutdown.cancelled() => {
                exec_token.cancel();
                let _ = (&mut monitor_handle).await;
                (
                    CommandResult::new(
                        &envelope.command_id,
                        &self.device_id,
                        self.slot_id,
                        ExecutionStatus::Cancelled,
                        "网关关闭，任务被取消",
                    ),
                    true,
                )
            }
            monitor_res = &mut monitor_handle => {
                exec_token.cancel();
                match monitor_res {
                    Ok(Ok(Some(outcome))) => {
                        self.result_from_outcome(outcome, &envelope, strategy.as_ref()).await
                    }
                    Ok(Ok(None)) => (
                        CommandResult::new(
                            &envelope.command_id,
                            &self.device_id,
                            self.slot_id,
                            ExecutionStatus::Cancelled,
                            "任务被取消",
                        ),
                        true,
                    ),
                    Ok(Err(e)) => {
                        let error = ErrorDetail::from_exception(&e);
                        (
                            CommandResult::failure(
                                &envelope.command_id,
                                &self.device_id,
                                self.slot_id,
                                strategy.build_failure_message(&envelope, &error),
                            )
                            .with_error(error),
                            true,
                        )
                    }
                    Err(e) => {
                        let error = ErrorDetail::from_exception(
                            &crate::utils::error::AppError::concurrency_error(format!(
                                "监视器异常退出: {}",
                                e
                            )),
                        );
                        (
                            CommandResult::failure(
                                &envelope.command_id,
                                &self.device_id,
                                self.slot_id,
                                strategy.build_failure_message(&envelope, &error),
                            )
                            .with_error(error),
                            true,
                        )
                    }
                }
            }
            step_res = &mut step_future => {
                // 步骤流程提前结束（前后置阶段终止或出错）：取消并收敛监视器
                exec_token.cancel();
                let drained = (&mut monitor_handle).await;
                match step_res {
                    Ok(Some(result)) => {
                        let enter = matches!(
                            result.status,
                            ExecutionStatus::Failed
                                | ExecutionStatus::Timeout
                                | ExecutionStatus::Cancelled
                        );
                        (result, enter)
                    }
                    Ok(None) => {
                        // 步骤流程被取消；若监视器恰在同一时刻给出结论则以其为准
                        if let Ok(Ok(Some(outcome))) = drained {
                            self.result_from_outcome(outcome, &envelope, strategy.as_ref()).await
                        } else {
                            (
                                CommandResult::new(
                                    &envelope.command_id,
                                    &self.device_id,
                                    self.slot_id,
                                    ExecutionStatus::Cancelled,
                                    "任务被取消",
                                ),
                                true,
                            )
                        }
                    }
                    Err(e) => {
                        let error = ErrorDetail::from_exception(&e);
                        (
                            CommandResult::failure(
                                &envelope.command_id,
                                &self.device_id,
                                self.slot_id,
                                strategy.build_failure_message(&envelope, &error),
                            )
                            .with_error(error),
                            true,
                        )
                    }
                }
            }
            _ = &mut deadline => {
                exec_token.cancel();
                let _ = (&mut monitor_handle).await;
                (
                    CommandResult::new(
                        &envelope.command_id,
                        &self.device_id,
                        self.slot_id,
                        ExecutionStatus::Timeout,
                        format!("任务执行超时（{}毫秒）", self.options.command_timeout_ms),
                    ),
                    true,
                )
            }
        };

        result.started_at = started_at;
        result.completed_at = Utc::now();
        // 汇总步骤流程记录的执行步骤
        let mut steps = std::mem::take(&mut *shared_steps.lock().unwrap());
        steps.append(&mut result.steps);
        result.steps = steps;

        info!(
            "🏁 任务执行结束: {} -> {} [{}-{}]",
            result.command_id, result.status, self.device_id, self.slot_id
        );
        (result, enter_recovery)
    }

    /// 将监视器结论转换为终态结果
    async fn result_from_outcome(
        &self,
        outcome: MonitorOutcome,
        envelope: &CommandEnvelope,
        strategy: &dyn ICommandStrategy,
    ) -> (CommandResult, bool) {
        match outcome.signal {
            MonitorSignal::Completed => {
                let has_warning = outcome.alarm_observed;
                let status = if has_warning {
                    ExecutionStatus::Warning
                } else {
                    ExecutionStatus::Success
                };
                let mut result = CommandResult::new(
                    &envelope.command_id,
                    &self.device_id,
                    self.slot_id,
                    status,
                    strategy.build_success_message(envelope, has_warning),
                );
                result.error = outcome.error;
                // 完成信号到达后的结果补充阶段（如盘点读取托盘标志）
                if let Err(e) = strategy
                    .on_completed(self.client.as_ref(), &self.map, &mut result)
                    .await
                {
                    let error = ErrorDetail::from_exception(&e);
                    let failed = CommandResult::failure(
                        &envelope.command_id,
                        &self.device_id,
                        self.slot_id,
                        strategy.build_failure_message(envelope, &error),
                    )
                    .with_error(error);
                    return (failed, true);
                }
                (result, false)
            }
            MonitorSignal::Alarm => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| ErrorDetail::from_code(crate::models::EXCEPTION_ERROR_CODE));
                let result = CommandResult::failure(
                    &envelope.command_id,
                    &self.device_id,
                    self.slot_id,
                    strategy.build_failure_message(envelope, &error),
                )
                .with_error(error);
                (result, true)
            }
            MonitorSignal::Failed => {
                let result = match outcome.error {
                    Some(error) => CommandResult::failure(
                        &envelope.command_id,
                        &self.device_id,
                        self.slot_id,
                        strategy.build_failure_message(envelope, &error),
                    )
                    .with_error(error),
                    None => CommandResult::failure(
                        &envelope.command_id,
                        &self.device_id,
                        self.slot_id,
                        "PLC上报任务失败",
                    ),
                };
                (result, true)
            }
        }
    }

    /// 步骤流程：前置阶段、参数写入、触发、启动、后置阶段与后备等待循环
    #[allow(clippy::too_many_arguments)]
    async fn run_steps(
        strategy: Arc<dyn ICommandStrategy>,
        client: Arc<dyn IPlcClient>,
        map: SignalMap,
        envelope: CommandEnvelope,
        device_id: String,
        slot_id: u16,
        cancellation: CancellationToken,
        barcode_validator: Option<Arc<dyn IBarcodeValidator>>,
        shared_steps: Arc<Mutex<Vec<ExecutionStep>>>,
    ) -> AppResult<Option<CommandResult>> {
        let ctx = ExecutionContext {
            client: client.as_ref(),
            map: &map,
            envelope: &envelope,
            device_id: &device_id,
            slot_id,
            cancellation: cancellation.clone(),
            barcode_validator,
        };
        let mut steps = Vec::new();

        let pre = strategy.pre_trigger(&ctx, &mut steps).await;
        Self::flush_steps(&shared_steps, &mut steps);
        if let Some(result) = pre? {
            return Ok(Some(result));
        }

        let written = strategy
            .write_parameters(client.as_ref(), &map, &envelope, &mut steps)
            .await;
        Self::flush_steps(&shared_steps, &mut steps);
        written?;

        let trigger_address = strategy.trigger_address(&map);
        client.write_bool(trigger_address, true).await?;
        shared_steps
            .lock()
            .unwrap()
            .push(ExecutionStep::new("trigger", trigger_address));

        client.write_bool(&map.start_process, true).await?;
        shared_steps
            .lock()
            .unwrap()
            .push(ExecutionStep::new("start_process", &map.start_process));

        let post = strategy.post_trigger(&ctx, &mut steps).await;
        Self::flush_steps(&shared_steps, &mut steps);
        if let Some(result) = post? {
            return Ok(Some(result));
        }

        // 后备等待循环：仅由取消结束，完成检测属于信号监视器
        cancellation.cancelled().await;
        Ok(None)
    }

    /// 将阶段内记录的步骤转移到共享列表
    fn flush_steps(shared: &Arc<Mutex<Vec<ExecutionStep>>>, steps: &mut Vec<ExecutionStep>) {
        if !steps.is_empty() {
            shared.lock().unwrap().append(steps);
        }
    }

    /// 在任务超时范围内以1秒间隔轮询设备就绪标志
    async fn wait_device_ready(&self) -> bool {
        let deadline = Instant::now() + self.options.command_timeout();
        loop {
            match self.client.is_device_ready().await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => warn!(
                    "设备就绪检查失败 [{}-{}]: {}",
                    self.device_id, self.slot_id, e
                ),
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::select! {
                _ = self.context.shutdown.cancelled() => return false,
                _ = sleep(DEVICE_READY_POLL_INTERVAL) => {}
            }
        }
    }

    /// 故障恢复流程
    /// 自动模式按恢复间隔轮询；手动模式阻塞在恢复事件上。
    /// 两种模式都要求设备就绪、任务失败标志与报警标志同时干净
    /// 才清除设备故障门并重新宣告就绪。
    async fn recover(&self) {
        info!(
            "🛠 工位进入恢复流程: {}-{} ({:?})",
            self.device_id, self.slot_id, self.options.recovery_mode
        );
        match self.options.recovery_mode {
            RecoveryMode::Auto => loop {
                tokio::select! {
                    _ = self.context.shutdown.cancelled() => return,
                    _ = sleep(self.options.recovery_interval()) => {}
                }
                if self.device_clean().await {
                    self.context.tracker.clear_device_error(&self.device_id);
                    self.announce_ready();
                    return;
                }
            },
            RecoveryMode::Manual => loop {
                tokio::select! {
                    _ = self.context.shutdown.cancelled() => return,
                    _ = self.recovery_notify.notified() => {}
                }
                if self.device_clean().await {
                    self.context.tracker.clear_device_error(&self.device_id);
                    self.announce_ready();
                    return;
                }
                warn!(
                    "⚠️ 恢复请求被拒绝: {}-{} 设备标志未复位",
                    self.device_id, self.slot_id
                );
            },
        }
    }

    /// 三重清洁检查：设备就绪且失败标志与报警标志均已复位
    async fn device_clean(&self) -> bool {
        match self.client.is_device_ready().await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                warn!("恢复检查失败 [{}-{}]: {}", self.device_id, self.slot_id, e);
                return false;
            }
        }
        match self.client.read_bool(&self.map.command_failed).await {
            Ok(false) => {}
            Ok(true) => return false,
            Err(e) => {
                warn!("恢复检查失败 [{}-{}]: {}", self.device_id, self.slot_id, e);
                return false;
            }
        }
        match self.client.read_bool(&self.map.error_alarm).await {
            Ok(false) => true,
            Ok(true) => false,
            Err(e) => {
                warn!("恢复检查失败 [{}-{}]: {}", self.device_id, self.slot_id, e);
                false
            }
        }
    }
}
