//! 调度器
//!
//! 单任务调度引擎：维护内存中的待派发FIFO与各工位能力注册表，
//! 将等待中的任务与就绪工位在全局调度规则下配对。
//!
//! 撮合规则按序生效：
//! 1. 全局报警门激活时不派发任何任务
//! 2. 设备故障门激活时跳过该设备的全部工位
//! 3. 执行中的移库/盘点阻塞一切新派发；移库/盘点仅在无任何执行中任务时派发
//! 4. 执行中的入库阻塞出库派发，反之亦然；同类任务可在不同工位并行
//! 5. 任务指定设备时必须落在该设备的工位上
//! 6. 工位能力集必须包含任务类型
//!
//! 严格FIFO：队头无法派发时停止撮合，绝不越过队头。

use crate::domain::channels::PauseGate;
use crate::domain::command_tracker::CommandTracker;
use crate::models::{CommandEnvelope, CommandState, CommandType, ReadyTicket};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// 相邻两次派发之间的固定间隔（启动后首次派发不受限）
pub const DISPATCH_STAGGER: Duration = Duration::from_secs(2);
/// 无事可做时的等待上限
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// 工位派发句柄
/// 调度器据此判断能力并写入工位信箱
pub struct SlotHandle {
    pub device_id: String,
    pub slot_id: u16,
    pub capabilities: Vec<CommandType>,
    pub mailbox_tx: mpsc::Sender<CommandEnvelope>,
}

/// 调度器
pub struct Matchmaker {
    input_rx: mpsc::Receiver<CommandEnvelope>,
    ready_rx: mpsc::UnboundedReceiver<ReadyTicket>,
    /// 用于归还未使用的就绪凭据
    ready_tx: mpsc::UnboundedSender<ReadyTicket>,
    slots: HashMap<(String, u16), SlotHandle>,
    tracker: Arc<CommandTracker>,
    pause_gate: Arc<PauseGate>,
    shutdown: CancellationToken,
    last_dispatch: Option<Instant>,
}

impl Matchmaker {
    pub fn new(
        input_rx: mpsc::Receiver<CommandEnvelope>,
        ready_rx: mpsc::UnboundedReceiver<ReadyTicket>,
        ready_tx: mpsc::UnboundedSender<ReadyTicket>,
        slots: HashMap<(String, u16), SlotHandle>,
        tracker: Arc<CommandTracker>,
        pause_gate: Arc<PauseGate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            input_rx,
            ready_rx,
            ready_tx,
            slots,
            tracker,
            pause_gate,
            shutdown,
            last_dispatch: None,
        }
    }

    /// 调度器主循环
    pub async fn run(mut self) {
        info!("🚦 调度器已启动 ({} 个工位)", self.slots.len());
        let mut fifo: VecDeque<CommandEnvelope> = VecDeque::new();
        let mut tickets: Vec<ReadyTicket> = Vec::new();

        'main: loop {
            // 1. 等待暂停门
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.pause_gate.wait() => {}
            }

            // 2. 吸收输入队列，丢弃已移除任务
            while let Ok(envelope) = self.input_rx.try_recv() {
                if self.tracker.state(&envelope.command_id) == Some(CommandState::Removed) {
                    debug!("忽略已移除任务: {}", envelope.command_id);
                    continue;
                }
                fifo.push_back(envelope);
            }

            // 3. 队列为空：复位暂停门，等待新输入或新就绪凭据
            if fifo.is_empty() {
                self.pause_gate.reset();
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    maybe = self.input_rx.recv() => match maybe {
                        Some(envelope) => {
                            if self.tracker.state(&envelope.command_id)
                                != Some(CommandState::Removed)
                            {
                                fifo.push_back(envelope);
                            }
                        }
                        None => break,
                    },
                    maybe = self.ready_rx.recv() => match maybe {
                        Some(ticket) => tickets.push(ticket),
                        None => break,
                    },
                    _ = sleep(IDLE_WAIT) => {}
                }
                continue;
            }

            // 4. 吸收全部可用的就绪凭据
            while let Ok(ticket) = self.ready_rx.try_recv() {
                tickets.push(ticket);
            }

            // 5. 严格FIFO撮合：队头无法派发时停止，绝不越过队头
            let mut dispatched = false;
            loop {
                let head = match fifo.front() {
                    Some(head) => head,
                    None => break,
                };
                if self.tracker.state(&head.command_id) == Some(CommandState::Removed) {
                    fifo.pop_front();
                    continue;
                }
                if !self.dispatch_allowed(head) {
                    break;
                }
                let slot_index = match self.find_ready_slot(head, &tickets) {
                    Some(index) => index,
                    None => break,
                };

                let envelope = fifo.pop_front().unwrap();
                let ticket = tickets.remove(slot_index);

                // 派发间隔被取消时任务与凭据各自回滚
                if !self.apply_stagger().await {
                    fifo.push_front(envelope);
                    tickets.push(ticket);
                    break 'main;
                }
                self.dispatch(envelope, ticket).await;
                dispatched = true;
            }

            // 6. 归还未使用的就绪凭据
            for ticket in tickets.drain(..) {
                let _ = self.ready_tx.send(ticket);
            }

            // 队头暂时无法撮合时等待新输入，避免空转
            if !dispatched && !fifo.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    maybe = self.input_rx.recv() => match maybe {
                        Some(envelope) => {
                            if self.tracker.state(&envelope.command_id)
                                != Some(CommandState::Removed)
                            {
                                fifo.push_back(envelope);
                            }
                        }
                        None => break,
                    },
                    _ = sleep(IDLE_WAIT) => {}
                }
            }
        }
        info!("🚦 调度器已停止");
    }

    /// 全局调度规则检查（规则1、3、4）
    fn dispatch_allowed(&self, envelope: &CommandEnvelope) -> bool {
        // 规则1: 全局报警门
        if self.tracker.is_alarm_active() {
            return false;
        }
        let processing = self.tracker.processing_commands();
        // 规则3: 执行中的排他任务阻塞一切派发
        if processing
            .iter()
            .any(|info| info.envelope.command_type.is_exclusive())
        {
            return false;
        }
        // 规则3: 排他任务仅在无任何执行中任务时派发
        if envelope.command_type.is_exclusive() && !processing.is_empty() {
            return false;
        }
        // 规则4: 入库与出库互斥
        match envelope.command_type {
            CommandType::Inbound => !processing
                .iter()
                .any(|info| info.envelope.command_type == CommandType::Outbound),
            CommandType::Outbound => !processing
                .iter()
                .any(|info| info.envelope.command_type == CommandType::Inbound),
            _ => true,
        }
    }

    /// 按序扫描就绪凭据，返回首个可承接该任务的工位（规则2、5、6）
    fn find_ready_slot(&self, envelope: &CommandEnvelope, tickets: &[ReadyTicket]) -> Option<usize> {
        for (index, ticket) in tickets.iter().enumerate() {
            // 规则2: 设备故障门
            if self.tracker.device_error(&ticket.device_id).is_some() {
                continue;
            }
            // 规则5: 设备亲和
            if let Some(device_id) = &envelope.device_id {
                if device_id != &ticket.device_id {
                    continue;
                }
            }
            // 规则6: 工位能力集
            let slot = match self
                .slots
                .get(&(ticket.device_id.clone(), ticket.slot_id))
            {
                Some(slot) => slot,
                None => continue,
            };
            if !slot.capabilities.contains(&envelope.command_type) {
                continue;
            }
            return Some(index);
        }
        None
    }

    /// 应用相邻派发之间的固定间隔
    /// 等待被关闭打断时返回 false
    async fn apply_stagger(&self) -> bool {
        if let Some(last) = self.last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < DISPATCH_STAGGER {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return false,
                    _ = sleep(DISPATCH_STAGGER - elapsed) => {}
                }
            }
        }
        true
    }

    /// 执行派发：先标记执行状态，再写入工位信箱
    async fn dispatch(&mut self, envelope: CommandEnvelope, ticket: ReadyTicket) {
        if let Err(e) = self
            .tracker
            .mark_processing(&envelope.command_id, &ticket.device_id)
        {
            // 标记失败（如并发移除），归还凭据
            warn!("任务进入执行状态失败: {} - {}", envelope.command_id, e);
            let _ = self.ready_tx.send(ticket);
            return;
        }

        let key = (ticket.device_id.clone(), ticket.slot_id);
        let slot = match self.slots.get(&key) {
            Some(slot) => slot,
            None => {
                warn!("未注册的工位: {}-{}", ticket.device_id, ticket.slot_id);
                return;
            }
        };

        info!(
            "📮 派发任务: {} ({}) -> {}-{}",
            envelope.command_id, envelope.command_type, ticket.device_id, ticket.slot_id
        );
        // 信箱容量为1且凭据保证工位空闲，try_send 不应失败
        if let Err(e) = slot.mailbox_tx.try_send(envelope) {
            warn!(
                "写入工位信箱失败: {}-{}: {}",
                ticket.device_id, ticket.slot_id, e
            );
            return;
        }
        self.last_dispatch = Some(Instant::now());
    }
}

/// 从工位配置构建派发句柄注册表的辅助函数
pub fn build_slot_registry(
    handles: Vec<SlotHandle>,
) -> HashMap<(String, u16), SlotHandle> {
    handles
        .into_iter()
        .map(|handle| ((handle.device_id.clone(), handle.slot_id), handle))
        .collect()
}
