//! 任务跟踪器
//!
//! 线程安全的任务状态索引，是任务生命周期状态的唯一权威来源。
//! 同时持有两类调度门闩：按设备的故障门和全局报警门。
//! 读多写少：状态查询走读锁，写入在短临界区内完成。
//!
//! 关键顺序约束：工位执行器必须先调用 `set_device_error`
//! 再发布失败结果，以关闭与调度器之间的派发竞争。

use crate::models::{
    AlarmGate, CommandEnvelope, CommandResult, CommandState, CommandTrackingInfo, DeviceErrorGate,
    DeviceStatistics, ErrorDetail, ExecutionStatus,
};
use crate::utils::error::{AppError, AppResult};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// 清理任务运行间隔
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// 已完成任务的保留时长（秒）
pub const COMPLETED_RETENTION_SECS: i64 = 3600;

/// 任务跟踪器
pub struct CommandTracker {
    /// 任务ID -> 跟踪记录
    commands: RwLock<HashMap<String, CommandTrackingInfo>>,
    /// 设备ID -> 设备故障门
    device_errors: RwLock<HashMap<String, DeviceErrorGate>>,
    /// 全局报警门
    alarm: RwLock<Option<AlarmGate>>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            device_errors: RwLock::new(HashMap::new()),
            alarm: RwLock::new(None),
        }
    }

    /// 以 Pending 状态登记新任务
    /// 任务ID重复时返回验证错误
    pub fn mark_pending(&self, envelope: CommandEnvelope) -> AppResult<()> {
        let mut commands = self.commands.write().unwrap();
        if commands.contains_key(&envelope.command_id) {
            return Err(AppError::validation_error(format!(
                "任务ID重复: {}",
                envelope.command_id
            )));
        }
        let command_id = envelope.command_id.clone();
        commands.insert(command_id, CommandTrackingInfo::pending(envelope));
        Ok(())
    }

    /// 标记任务进入执行状态
    /// 仅允许从 Pending 进入 Processing，且最多进入一次
    pub fn mark_processing(&self, command_id: &str, device_id: &str) -> AppResult<()> {
        let mut commands = self.commands.write().unwrap();
        let info = commands
            .get_mut(command_id)
            .ok_or_else(|| AppError::not_found_error("Command", command_id))?;
        if info.state != CommandState::Pending {
            return Err(AppError::state_transition_error(
                info.state.to_string(),
                CommandState::Processing.to_string(),
                format!("任务 {} 不允许重复进入执行状态", command_id),
            ));
        }
        info.state = CommandState::Processing;
        info.device_id = Some(device_id.to_string());
        info.started_at = Some(Utc::now());
        Ok(())
    }

    /// 以终态结果标记任务完成
    /// 同时清除由该任务引发的全局报警门
    pub fn mark_completed(&self, result: &CommandResult) -> AppResult<()> {
        let mut commands = self.commands.write().unwrap();
        let info = commands
            .get_mut(&result.command_id)
            .ok_or_else(|| AppError::not_found_error("Command", &result.command_id))?;
        if info.state == CommandState::Removed {
            return Err(AppError::state_transition_error(
                info.state.to_string(),
                CommandState::Completed.to_string(),
                format!("任务 {} 已被移除", result.command_id),
            ));
        }
        info.state = CommandState::Completed;
        info.last_status = Some(result.status);
        info.last_result = Some(result.clone());
        info.completed_at = Some(result.completed_at);
        drop(commands);

        // 引发报警的任务到达终态后清除全局报警门
        let mut alarm = self.alarm.write().unwrap();
        if alarm
            .as_ref()
            .map_or(false, |gate| gate.command_id == result.command_id)
        {
            info!("🔕 全局报警门已清除: {}", result.command_id);
            *alarm = None;
        }
        Ok(())
    }

    /// 软删除任务，仅在 Pending 状态下生效
    /// 返回是否删除成功
    pub fn mark_removed(&self, command_id: &str) -> AppResult<bool> {
        let mut commands = self.commands.write().unwrap();
        let info = commands
            .get_mut(command_id)
            .ok_or_else(|| AppError::not_found_error("Command", command_id))?;
        if info.state != CommandState::Pending {
            debug!("任务 {} 状态为 {}，忽略移除请求", command_id, info.state);
            return Ok(false);
        }
        info.state = CommandState::Removed;
        Ok(true)
    }

    /// 从索引中彻底丢弃任务记录
    /// 用于提交被取消时的回滚
    pub fn discard(&self, command_id: &str) {
        self.commands.write().unwrap().remove(command_id);
    }

    /// 查询任务当前状态
    pub fn state(&self, command_id: &str) -> Option<CommandState> {
        self.commands
            .read()
            .unwrap()
            .get(command_id)
            .map(|info| info.state)
    }

    /// 查询任务跟踪记录
    pub fn tracking_info(&self, command_id: &str) -> Option<CommandTrackingInfo> {
        self.commands.read().unwrap().get(command_id).cloned()
    }

    /// 统计各状态任务数量 (pending, processing, completed)
    pub fn counts(&self) -> (usize, usize, usize) {
        let commands = self.commands.read().unwrap();
        let mut pending = 0;
        let mut processing = 0;
        let mut completed = 0;
        for info in commands.values() {
            match info.state {
                CommandState::Pending => pending += 1,
                CommandState::Processing => processing += 1,
                CommandState::Completed => completed += 1,
                CommandState::Removed => {}
            }
        }
        (pending, processing, completed)
    }

    /// 枚举等待中的任务，按提交时间排序
    pub fn pending_commands(&self) -> Vec<CommandTrackingInfo> {
        let commands = self.commands.read().unwrap();
        let mut pending: Vec<_> = commands
            .values()
            .filter(|info| info.state == CommandState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|info| info.submitted_at);
        pending
    }

    /// 枚举执行中的任务，按开始时间排序
    pub fn processing_commands(&self) -> Vec<CommandTrackingInfo> {
        let commands = self.commands.read().unwrap();
        let mut processing: Vec<_> = commands
            .values()
            .filter(|info| info.state == CommandState::Processing)
            .cloned()
            .collect();
        processing.sort_by_key(|info| info.started_at);
        processing
    }

    /// 按设备统计任务执行情况
    pub fn device_statistics(&self) -> HashMap<String, DeviceStatistics> {
        let commands = self.commands.read().unwrap();
        let mut statistics: HashMap<String, DeviceStatistics> = HashMap::new();
        for info in commands.values() {
            let device_id = match info.device_id.as_ref().or(info.envelope.device_id.as_ref()) {
                Some(device_id) => device_id.clone(),
                None => continue,
            };
            let entry = statistics.entry(device_id).or_default();
            match info.state {
                CommandState::Processing => entry.processing += 1,
                CommandState::Completed => {
                    entry.completed += 1;
                    match info.last_status {
                        Some(ExecutionStatus::Success) | Some(ExecutionStatus::Warning) => {
                            entry.succeeded += 1
                        }
                        Some(_) => entry.failed += 1,
                        None => {}
                    }
                }
                _ => {}
            }
        }
        let device_errors = self.device_errors.read().unwrap();
        for (device_id, _) in device_errors.iter() {
            statistics.entry(device_id.clone()).or_default().error_gate_active = true;
        }
        statistics
    }

    /// 设置全局报警门
    pub fn set_alarm(&self, command_id: &str, error: ErrorDetail) {
        let mut alarm = self.alarm.write().unwrap();
        if alarm.is_none() {
            warn!("🚨 全局报警门已设置: {} (代码 {})", command_id, error.code);
            *alarm = Some(AlarmGate {
                command_id: command_id.to_string(),
                error,
                since: Utc::now(),
            });
        }
    }

    /// 手动清除全局报警门
    pub fn clear_alarm(&self) {
        *self.alarm.write().unwrap() = None;
    }

    /// 查询全局报警门
    pub fn alarm(&self) -> Option<AlarmGate> {
        self.alarm.read().unwrap().clone()
    }

    /// 全局报警门是否激活
    pub fn is_alarm_active(&self) -> bool {
        self.alarm.read().unwrap().is_some()
    }

    /// 设置设备故障门
    /// 必须发生在失败结果发布之前
    pub fn set_device_error(
        &self,
        device_id: &str,
        slot_id: u16,
        message: impl Into<String>,
        error_code: Option<u16>,
    ) {
        let mut device_errors = self.device_errors.write().unwrap();
        if !device_errors.contains_key(device_id) {
            let message = message.into();
            warn!("⛔ 设备故障门已设置: {} 工位 {} - {}", device_id, slot_id, message);
            device_errors.insert(
                device_id.to_string(),
                DeviceErrorGate {
                    device_id: device_id.to_string(),
                    slot_id,
                    message,
                    error_code,
                    since: Utc::now(),
                },
            );
        }
    }

    /// 清除设备故障门
    pub fn clear_device_error(&self, device_id: &str) {
        if self.device_errors.write().unwrap().remove(device_id).is_some() {
            info!("🟢 设备故障门已清除: {}", device_id);
        }
    }

    /// 查询设备故障门
    pub fn device_error(&self, device_id: &str) -> Option<DeviceErrorGate> {
        self.device_errors.read().unwrap().get(device_id).cloned()
    }

    /// 清理过期任务记录
    /// 移除完成超过保留时长的任务和全部已移除任务
    pub fn cleanup(&self) {
        let now = Utc::now();
        let mut commands = self.commands.write().unwrap();
        let before = commands.len();
        commands.retain(|_, info| match info.state {
            CommandState::Completed => info.completed_at.map_or(true, |completed_at| {
                (now - completed_at).num_seconds() < COMPLETED_RETENTION_SECS
            }),
            CommandState::Removed => false,
            _ => true,
        });
        let evicted = before - commands.len();
        if evicted > 0 {
            debug!("🧹 清理过期任务记录: {} 条", evicted);
        }
    }
}

impl Default for CommandTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandType;

    fn envelope(command_id: &str) -> CommandEnvelope {
        CommandEnvelope::new(command_id, CommandType::Outbound)
    }

    /// 状态转换沿 Pending -> Processing -> Completed 单向推进
    #[test]
    fn test_state_transitions_forward_only() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        assert_eq!(tracker.state("T1"), Some(CommandState::Pending));

        tracker.mark_processing("T1", "D1").unwrap();
        assert_eq!(tracker.state("T1"), Some(CommandState::Processing));

        // 重复进入 Processing 被拒绝
        assert!(tracker.mark_processing("T1", "D1").is_err());

        let result = CommandResult::success("T1", "D1", 1, "done");
        tracker.mark_completed(&result).unwrap();
        assert_eq!(tracker.state("T1"), Some(CommandState::Completed));

        // Processing 状态下不允许移除
        tracker.mark_pending(envelope("T2")).unwrap();
        tracker.mark_processing("T2", "D1").unwrap();
        assert!(!tracker.mark_removed("T2").unwrap());
    }

    /// 任务ID重复时登记被拒绝
    #[test]
    fn test_duplicate_command_id_rejected() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        assert!(tracker.mark_pending(envelope("T1")).is_err());
    }

    /// Removed 仅能从 Pending 进入且为终态
    #[test]
    fn test_removed_only_from_pending() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        assert!(tracker.mark_removed("T1").unwrap());
        assert_eq!(tracker.state("T1"), Some(CommandState::Removed));

        // 已移除任务不允许进入执行状态
        assert!(tracker.mark_processing("T1", "D1").is_err());
    }

    /// 引发报警的任务到达终态后全局报警门自动清除
    #[test]
    fn test_alarm_cleared_on_terminal_state() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        tracker.mark_processing("T1", "D1").unwrap();

        tracker.set_alarm("T1", ErrorDetail::from_code(15));
        assert!(tracker.is_alarm_active());

        // 其他任务到达终态不影响报警门
        tracker.mark_pending(envelope("T2")).unwrap();
        tracker.mark_processing("T2", "D1").unwrap();
        let other = CommandResult::success("T2", "D1", 2, "done");
        tracker.mark_completed(&other).unwrap();
        assert!(tracker.is_alarm_active());

        let result = CommandResult::failure("T1", "D1", 1, "failed");
        tracker.mark_completed(&result).unwrap();
        assert!(!tracker.is_alarm_active());
    }

    /// 设备故障门的设置、查询与清除
    #[test]
    fn test_device_error_gate() {
        let tracker = CommandTracker::new();
        assert!(tracker.device_error("D1").is_none());

        tracker.set_device_error("D1", 1, "PLC上报任务失败", Some(3));
        let gate = tracker.device_error("D1").unwrap();
        assert_eq!(gate.slot_id, 1);
        assert_eq!(gate.error_code, Some(3));

        // 重复设置保留首个故障记录
        tracker.set_device_error("D1", 2, "另一个故障", None);
        assert_eq!(tracker.device_error("D1").unwrap().slot_id, 1);

        tracker.clear_device_error("D1");
        assert!(tracker.device_error("D1").is_none());
    }

    /// 统计与枚举按时间排序
    #[test]
    fn test_counts_and_enumerations() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        tracker.mark_pending(envelope("T2")).unwrap();
        tracker.mark_pending(envelope("T3")).unwrap();
        tracker.mark_processing("T2", "D1").unwrap();

        let (pending, processing, completed) = tracker.counts();
        assert_eq!((pending, processing, completed), (2, 1, 0));

        let pending = tracker.pending_commands();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].submitted_at <= pending[1].submitted_at);

        let statistics = tracker.device_statistics();
        assert_eq!(statistics.get("D1").unwrap().processing, 1);
    }

    /// 清理移除过期的已完成任务与全部已移除任务
    #[test]
    fn test_cleanup_evicts_stale_entries() {
        let tracker = CommandTracker::new();
        tracker.mark_pending(envelope("T1")).unwrap();
        tracker.mark_processing("T1", "D1").unwrap();
        let mut result = CommandResult::success("T1", "D1", 1, "done");
        result.completed_at = Utc::now() - chrono::Duration::hours(2);
        tracker.mark_completed(&result).unwrap();

        tracker.mark_pending(envelope("T2")).unwrap();
        tracker.mark_removed("T2").unwrap();

        tracker.mark_pending(envelope("T3")).unwrap();

        tracker.cleanup();
        assert_eq!(tracker.state("T1"), None);
        assert_eq!(tracker.state("T2"), None);
        assert_eq!(tracker.state("T3"), Some(CommandState::Pending));
    }
}
