//! 应答中心
//!
//! 结果流的唯一消费者。对每个结果：
//! 报警（中间状态）设置全局报警门并仅广播，任务保持执行状态；
//! 终态结果标记任务完成（同时清除该任务引发的报警门）。
//! 每个结果都映射为对外通知写入广播总线。

use crate::domain::channels::EventBus;
use crate::domain::command_tracker::CommandTracker;
use crate::models::{CommandResult, ExecutionStatus, ResultNotification};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 应答中心
pub struct ReplyHub {
    result_rx: mpsc::Receiver<CommandResult>,
    tracker: Arc<CommandTracker>,
    bus: Arc<EventBus>,
    shutdown: CancellationToken,
}

impl ReplyHub {
    pub fn new(
        result_rx: mpsc::Receiver<CommandResult>,
        tracker: Arc<CommandTracker>,
        bus: Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            result_rx,
            tracker,
            bus,
            shutdown,
        }
    }

    /// 应答中心主循环
    pub async fn run(mut self) {
        info!("📡 应答中心已启动");
        loop {
            tokio::select! {
                maybe = self.result_rx.recv() => match maybe {
                    Some(result) => self.handle(result),
                    None => break,
                },
                _ = self.shutdown.cancelled() => {
                    // 关闭前排空已产生的结果
                    while let Ok(result) = self.result_rx.try_recv() {
                        self.handle(result);
                    }
                    break;
                }
            }
        }
        info!("📡 应答中心已停止");
    }

    /// 处理单个结果：更新跟踪器并广播通知
    fn handle(&self, result: CommandResult) {
        debug!(
            "📨 收到结果: {} -> {} [{}]",
            result.command_id, result.status, result.device_id
        );
        if result.status == ExecutionStatus::Alarm {
            // 中间报警：设置全局报警门，任务保持执行状态
            if let Some(error) = result.error.clone() {
                self.tracker.set_alarm(&result.command_id, error);
            }
        } else if let Err(e) = self.tracker.mark_completed(&result) {
            warn!("标记任务完成失败: {} - {}", result.command_id, e);
        }
        self.bus.publish(ResultNotification::from(&result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CommandEnvelope, CommandState, CommandType, ErrorDetail, NotificationStatus,
    };

    /// 报警结果设置全局报警门且任务保持执行状态，终态结果完成任务并清除报警门
    #[tokio::test]
    async fn test_reply_hub_alarm_then_terminal() {
        let tracker = Arc::new(CommandTracker::new());
        let bus = Arc::new(EventBus::new());
        let mut notifications = bus.subscribe();
        let (result_tx, result_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        tracker
            .mark_pending(CommandEnvelope::new("T1", CommandType::Transfer))
            .unwrap();
        tracker.mark_processing("T1", "D1").unwrap();

        let hub = ReplyHub::new(result_rx, tracker.clone(), bus.clone(), shutdown.clone());
        let handle = tokio::spawn(hub.run());

        // 中间报警结果
        let alarm = CommandResult::alarm("T1", "D1", 1, ErrorDetail::from_code(15));
        result_tx.send(alarm).await.unwrap();

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.status, NotificationStatus::Error);
        assert_eq!(notification.error.as_ref().unwrap().code, 15);
        assert!(tracker.is_alarm_active());
        assert_eq!(tracker.state("T1"), Some(CommandState::Processing));

        // 终态结果
        let success = CommandResult::new(
            "T1",
            "D1",
            1,
            ExecutionStatus::Warning,
            "移库任务完成（执行期间出现报警）",
        );
        result_tx.send(success).await.unwrap();

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.status, NotificationStatus::Success);
        assert_eq!(notification.raw_status, ExecutionStatus::Warning);
        assert_eq!(tracker.state("T1"), Some(CommandState::Completed));
        assert!(!tracker.is_alarm_active());

        shutdown.cancel();
        drop(result_tx);
        handle.await.unwrap();
    }
}
