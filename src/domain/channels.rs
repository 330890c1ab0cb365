//! 通道与门闩
//!
//! 核心内部的任务间通信原语：
//! - **输入通道**: 有界任务队列，对提交方施加背压
//! - **就绪通道**: 无界的工位就绪凭据流
//! - **工位信箱**: 容量为1，工位读走前不会收到第二个任务
//! - **结果通道**: 多生产者（执行器、监视器）单消费者（应答中心）
//! - **广播总线**: 无界订阅列表，发布永不阻塞执行器
//! - **暂停门**: 二元门闩，调度器在其上等待，新提交自动置位

use crate::models::ResultNotification;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// 输入通道容量（对提交方施加背压）
pub const INPUT_QUEUE_CAPACITY: usize = 64;
/// 结果通道容量
pub const RESULT_CHANNEL_CAPACITY: usize = 256;
/// 工位信箱容量
pub const SLOT_MAILBOX_CAPACITY: usize = 1;

/// 暂停门
/// 由唤醒位与手动暂停闩两部分组成：
/// 唤醒位置位且未被手动暂停时调度器才可以运行。
/// 新任务提交自动置位唤醒位（到达即唤醒），
/// 调度器空转时复位唤醒位；手动暂停独立于唤醒位，
/// 保证暂停期间的新提交不会恢复调度。
pub struct PauseGate {
    state: AtomicBool,
    held: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    pub fn new(initially_set: bool) -> Self {
        Self {
            state: AtomicBool::new(initially_set),
            held: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// 置位唤醒位并唤醒所有等待者
    pub fn set(&self) {
        self.state.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// 复位唤醒位
    pub fn reset(&self) {
        self.state.store(false, Ordering::SeqCst);
    }

    /// 返回唤醒位当前是否置位
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }

    /// 手动暂停
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// 解除手动暂停并唤醒等待者
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// 是否处于手动暂停状态
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// 等待门放行：唤醒位置位且未被手动暂停
    pub async fn wait(&self) {
        loop {
            // 先注册等待再检查状态，避免丢失唤醒
            let notified = self.notify.notified();
            if self.state.load(Ordering::SeqCst) && !self.held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// 结果广播总线
/// 无界订阅者列表；发布从不阻塞，已关闭的订阅者在发布时被清理
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ResultNotification>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// 新建一个惰性订阅流
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ResultNotification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// 向所有订阅者发布通知
    pub fn publish(&self, notification: ResultNotification) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandResult, ResultNotification};

    /// 置位后等待立即返回
    #[tokio::test]
    async fn test_pause_gate_set_releases_waiters() {
        let gate = std::sync::Arc::new(PauseGate::new(false));
        assert!(!gate.is_set());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_set());

        gate.reset();
        assert!(!gate.is_set());
    }

    /// 手动暂停闩优先于唤醒位：暂停期间置位唤醒位不放行
    #[tokio::test]
    async fn test_pause_gate_hold_overrides_set() {
        let gate = std::sync::Arc::new(PauseGate::new(true));
        gate.hold();
        assert!(gate.is_held());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // 暂停期间的新提交（置位唤醒位）不会放行
        gate.set();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.release();
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    /// 广播总线向全部订阅者扇出并清理已关闭的订阅者
    #[tokio::test]
    async fn test_event_bus_fan_out() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let result = CommandResult::success("T1", "D1", 1, "done");
        bus.publish(ResultNotification::from(&result));
        assert_eq!(rx1.recv().await.unwrap().command_id, "T1");

        // 关闭一个订阅者后，下次发布时被清理
        drop(rx2);
        bus.publish(ResultNotification::from(&result));
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(rx1.recv().await.unwrap().command_id, "T1");
    }
}
