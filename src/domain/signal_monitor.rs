//! 信号监视器
//!
//! 在单个任务执行期间与步骤流程并行运行的监视协程，
//! 以固定200毫秒节拍轮询三个观测点：
//! 错误代码寄存器、任务失败标志和策略选定的完成信号。
//! 首次读到非零错误代码时构建错误详情并推送一次中间报警结果；
//! 若设备配置为报警即失败则立即以报警结束监视。

use crate::infrastructure::plc::{IPlcClient, SignalMap};
use crate::models::{CommandResult, ErrorDetail};
use crate::utils::error::AppResult;
use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// 监视轮询节拍
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 监视器检测到的信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    /// 报警且设备配置为报警即失败
    Alarm,
    /// PLC置位任务失败标志
    Failed,
    /// 完成信号到达
    Completed,
}

/// 监视器结束时的观测结论
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    /// 检测到的信号
    pub signal: MonitorSignal,
    /// 伴随的错误详情
    pub error: Option<ErrorDetail>,
    /// 检测时间
    pub detected_at: DateTime<Utc>,
    /// 执行期间是否观测到过报警
    pub alarm_observed: bool,
}

/// 信号监视器
/// 生命周期与单次任务执行绑定，独立于步骤流程
pub struct SignalMonitor {
    client: Arc<dyn IPlcClient>,
    map: SignalMap,
    /// 策略选定的完成信号地址
    completion_address: String,
    /// 报警即失败策略（设备配置与策略覆盖合成后的结果）
    fail_on_alarm: bool,
    command_id: String,
    device_id: String,
    slot_id: u16,
    result_tx: mpsc::Sender<CommandResult>,
    cancellation: CancellationToken,
}

impl SignalMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn IPlcClient>,
        map: SignalMap,
        completion_address: String,
        fail_on_alarm: bool,
        command_id: String,
        device_id: String,
        slot_id: u16,
        result_tx: mpsc::Sender<CommandResult>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            client,
            map,
            completion_address,
            fail_on_alarm,
            command_id,
            device_id,
            slot_id,
            result_tx,
            cancellation,
        }
    }

    /// 运行监视循环直到检测到信号或被取消
    /// 被取消时返回 `Ok(None)`；传输错误向上传播由执行器转换为失败结果
    pub async fn run(self) -> AppResult<Option<MonitorOutcome>> {
        let mut alarm_observed = false;
        let mut alarm_error: Option<ErrorDetail> = None;

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return Ok(None),
                _ = sleep(MONITOR_POLL_INTERVAL) => {}
            }

            // 1. 错误代码寄存器：非零即报警
            let code = self.client.read_u16(&self.map.error_code).await?;
            if code != 0 && !alarm_observed {
                alarm_observed = true;
                let error = ErrorDetail::from_code(code);
                warn!(
                    "🚨 检测到报警 [{}]: {} (代码 {})",
                    self.command_id, error.message, code
                );
                // 中间报警结果最多推送一次
                let alarm = CommandResult::alarm(
                    &self.command_id,
                    &self.device_id,
                    self.slot_id,
                    error.clone(),
                );
                let _ = self.result_tx.send(alarm).await;
                alarm_error = Some(error.clone());

                if self.fail_on_alarm {
                    return Ok(Some(MonitorOutcome {
                        signal: MonitorSignal::Alarm,
                        error: Some(error),
                        detected_at: Utc::now(),
                        alarm_observed,
                    }));
                }
            }

            // 2. 任务失败标志
            if self.client.read_bool(&self.map.command_failed).await? {
                let error = alarm_error
                    .clone()
                    .or_else(|| (code != 0).then(|| ErrorDetail::from_code(code)));
                return Ok(Some(MonitorOutcome {
                    signal: MonitorSignal::Failed,
                    error,
                    detected_at: Utc::now(),
                    alarm_observed,
                }));
            }

            // 3. 策略选定的完成信号
            if self.client.read_bool(&self.completion_address).await? {
                return Ok(Some(MonitorOutcome {
                    signal: MonitorSignal::Completed,
                    error: alarm_error.clone(),
                    detected_at: Utc::now(),
                    alarm_observed,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::plc::{MockPlcClient, SignalMapTemplate};
    use crate::models::ExecutionStatus;
    use serde_json::Value;

    fn monitor_for(
        client: Arc<MockPlcClient>,
        map: &crate::infrastructure::plc::SignalMap,
        fail_on_alarm: bool,
        result_tx: mpsc::Sender<CommandResult>,
        token: CancellationToken,
    ) -> SignalMonitor {
        SignalMonitor::new(
            client,
            map.clone(),
            map.outbound_completed.clone(),
            fail_on_alarm,
            "T1".to_string(),
            "D1".to_string(),
            1,
            result_tx,
            token,
        )
    }

    /// 完成信号到达时返回 Completed
    #[tokio::test]
    async fn test_monitor_detects_completion() {
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        client.preset_read_value(&map.outbound_completed, Value::Bool(true));

        let (tx, _rx) = mpsc::channel(8);
        let monitor = monitor_for(client, &map, false, tx, CancellationToken::new());
        let outcome = monitor.run().await.unwrap().unwrap();
        assert_eq!(outcome.signal, MonitorSignal::Completed);
        assert!(!outcome.alarm_observed);
        assert!(outcome.error.is_none());
    }

    /// 报警即失败关闭时：推送一次中间报警后继续监视到完成
    #[tokio::test]
    async fn test_monitor_alarm_without_fail_on_alarm() {
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        client.preset_read_value(&map.error_code, Value::from(15u16));
        client.preset_read_value(&map.outbound_completed, Value::Bool(true));

        let (tx, mut rx) = mpsc::channel(8);
        let monitor = monitor_for(client, &map, false, tx, CancellationToken::new());
        let outcome = monitor.run().await.unwrap().unwrap();

        assert_eq!(outcome.signal, MonitorSignal::Completed);
        assert!(outcome.alarm_observed);

        // 中间报警结果恰好推送一次
        let alarm = rx.recv().await.unwrap();
        assert_eq!(alarm.status, ExecutionStatus::Alarm);
        let error = alarm.error.unwrap();
        assert_eq!(error.code, 15);
        assert_eq!(error.message, "Warning: Pallet not meeting requirements");
        assert!(rx.try_recv().is_err());
    }

    /// 报警即失败开启时：报警立即结束监视
    #[tokio::test]
    async fn test_monitor_alarm_with_fail_on_alarm() {
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        client.preset_read_value(&map.error_code, Value::from(15u16));

        let (tx, mut rx) = mpsc::channel(8);
        let monitor = monitor_for(client, &map, true, tx, CancellationToken::new());
        let outcome = monitor.run().await.unwrap().unwrap();

        assert_eq!(outcome.signal, MonitorSignal::Alarm);
        assert_eq!(outcome.error.as_ref().unwrap().code, 15);
        assert_eq!(rx.recv().await.unwrap().status, ExecutionStatus::Alarm);
    }

    /// 任务失败标志置位时返回 Failed
    #[tokio::test]
    async fn test_monitor_detects_command_failed() {
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        client.preset_read_value(&map.command_failed, Value::Bool(true));

        let (tx, _rx) = mpsc::channel(8);
        let monitor = monitor_for(client, &map, false, tx, CancellationToken::new());
        let outcome = monitor.run().await.unwrap().unwrap();
        assert_eq!(outcome.signal, MonitorSignal::Failed);
    }

    /// 取消令牌触发时返回 None
    #[tokio::test]
    async fn test_monitor_cancellation() {
        let client = Arc::new(MockPlcClient::new_for_testing("D1"));
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let monitor = monitor_for(client, &map, false, tx, token.clone());
        let handle = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_none());
    }
}
