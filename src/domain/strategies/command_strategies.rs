//! 出库、移库、盘点任务策略
//!
//! 每个策略负责一种任务类型的原子PLC交互协议：
//! 参数写入、触发/完成信号选择和结果消息构建。
//! 入库策略因包含条码验证协议单独实现。

use crate::domain::services::{ExecutionContext, ICommandStrategy};
use crate::infrastructure::plc::{IPlcClient, SignalMap};
use crate::models::{
    CommandEnvelope, CommandResult, CommandType, ErrorDetail, ExecutionStep, Location,
};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use log::info;

/// 写入库位的楼层/巷道/货格三个寄存器
pub(crate) async fn write_location_registers(
    client: &dyn IPlcClient,
    floor_address: &str,
    rail_address: &str,
    block_address: &str,
    location: &Location,
) -> AppResult<()> {
    client.write_u16(floor_address, location.floor).await?;
    client.write_u16(rail_address, location.rail).await?;
    client.write_u16(block_address, location.block).await?;
    Ok(())
}

/// 校验信封的任务类型与策略声明一致
fn ensure_command_type(envelope: &CommandEnvelope, expected: CommandType) -> AppResult<()> {
    if envelope.command_type != expected {
        return Err(AppError::validation_error(format!(
            "策略不支持的任务类型: 期望 {}, 实际 {}",
            expected, envelope.command_type
        )));
    }
    Ok(())
}

/// 出库任务策略
/// 写入源库位、出入口和双向方向，触发出库信号
pub struct OutboundStrategy;

#[async_trait]
impl ICommandStrategy for OutboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Outbound
    }

    fn trigger_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.outbound_trigger
    }

    fn completion_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.outbound_completed
    }

    fn validate(&self, envelope: &CommandEnvelope) -> AppResult<()> {
        ensure_command_type(envelope, CommandType::Outbound)?;
        if envelope.source.is_none() {
            return Err(AppError::validation_error("出库任务必须提供源库位"));
        }
        Ok(())
    }

    async fn write_parameters(
        &self,
        client: &dyn IPlcClient,
        map: &SignalMap,
        envelope: &CommandEnvelope,
        steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<()> {
        let source = envelope
            .source
            .ok_or_else(|| AppError::validation_error("出库任务必须提供源库位"))?;

        info!("📝 写入出库参数 [{}]: 源 {}, 口 {}", envelope.command_id, source, envelope.gate_number);
        write_location_registers(
            client,
            &map.source_floor,
            &map.source_rail,
            &map.source_block,
            &source,
        )
        .await?;
        client.write_u16(&map.gate_number, envelope.gate_number).await?;
        client
            .write_bool(&map.exit_direction, envelope.exit_direction.as_plc_bool())
            .await?;
        client
            .write_bool(&map.enter_direction, envelope.enter_direction.as_plc_bool())
            .await?;

        steps.push(ExecutionStep::new(
            "write_parameters",
            format!("源 {}, 口 {}", source, envelope.gate_number),
        ));
        Ok(())
    }

    fn build_success_message(&self, envelope: &CommandEnvelope, has_warning: bool) -> String {
        let source = envelope.source.map(|l| l.to_string()).unwrap_or_default();
        if has_warning {
            format!("出库任务完成（执行期间出现报警）: 源库位 {}", source)
        } else {
            format!("出库任务完成: 源库位 {}", source)
        }
    }

    fn build_failure_message(&self, envelope: &CommandEnvelope, error: &ErrorDetail) -> String {
        format!(
            "出库任务失败: {} - {} (代码 {})",
            envelope.command_id, error.message, error.code
        )
    }
}

/// 移库任务策略
/// 写入源库位、目标库位和双向方向，触发移库信号
pub struct TransferStrategy;

#[async_trait]
impl ICommandStrategy for TransferStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Transfer
    }

    fn trigger_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.transfer_trigger
    }

    fn completion_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.transfer_completed
    }

    fn validate(&self, envelope: &CommandEnvelope) -> AppResult<()> {
        ensure_command_type(envelope, CommandType::Transfer)?;
        if envelope.source.is_none() || envelope.destination.is_none() {
            return Err(AppError::validation_error(
                "移库任务必须同时提供源库位和目标库位",
            ));
        }
        Ok(())
    }

    async fn write_parameters(
        &self,
        client: &dyn IPlcClient,
        map: &SignalMap,
        envelope: &CommandEnvelope,
        steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<()> {
        let source = envelope
            .source
            .ok_or_else(|| AppError::validation_error("移库任务必须提供源库位"))?;
        let destination = envelope
            .destination
            .ok_or_else(|| AppError::validation_error("移库任务必须提供目标库位"))?;

        info!("📝 写入移库参数 [{}]: {} -> {}", envelope.command_id, source, destination);
        write_location_registers(
            client,
            &map.source_floor,
            &map.source_rail,
            &map.source_block,
            &source,
        )
        .await?;
        write_location_registers(
            client,
            &map.dest_floor,
            &map.dest_rail,
            &map.dest_block,
            &destination,
        )
        .await?;
        client
            .write_bool(&map.exit_direction, envelope.exit_direction.as_plc_bool())
            .await?;
        client
            .write_bool(&map.enter_direction, envelope.enter_direction.as_plc_bool())
            .await?;

        steps.push(ExecutionStep::new(
            "write_parameters",
            format!("{} -> {}", source, destination),
        ));
        Ok(())
    }

    fn build_success_message(&self, envelope: &CommandEnvelope, has_warning: bool) -> String {
        let source = envelope.source.map(|l| l.to_string()).unwrap_or_default();
        let destination = envelope
            .destination
            .map(|l| l.to_string())
            .unwrap_or_default();
        if has_warning {
            format!(
                "移库任务完成（执行期间出现报警）: {} -> {}",
                source, destination
            )
        } else {
            format!("移库任务完成: {} -> {}", source, destination)
        }
    }

    fn build_failure_message(&self, envelope: &CommandEnvelope, error: &ErrorDetail) -> String {
        format!(
            "移库任务失败: {} - {} (代码 {})",
            envelope.command_id, error.message, error.code
        )
    }
}

/// 盘点任务策略
/// 写入源库位与深度，触发盘点信号；完成后读取托盘存在标志。
/// 盘点期间任何报警都立即终止任务，无视设备的报警即失败配置。
pub struct CheckPalletStrategy;

#[async_trait]
impl ICommandStrategy for CheckPalletStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::CheckPallet
    }

    fn trigger_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.pallet_check_trigger
    }

    fn completion_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.pallet_check_completed
    }

    fn validate(&self, envelope: &CommandEnvelope) -> AppResult<()> {
        ensure_command_type(envelope, CommandType::CheckPallet)?;
        let source = envelope
            .source
            .ok_or_else(|| AppError::validation_error("盘点任务必须提供源库位"))?;
        if source.depth == 0 {
            return Err(AppError::validation_error("盘点任务源库位深度必须大于0"));
        }
        Ok(())
    }

    async fn write_parameters(
        &self,
        client: &dyn IPlcClient,
        map: &SignalMap,
        envelope: &CommandEnvelope,
        steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<()> {
        let source = envelope
            .source
            .ok_or_else(|| AppError::validation_error("盘点任务必须提供源库位"))?;

        info!("📝 写入盘点参数 [{}]: 源 {}", envelope.command_id, source);
        write_location_registers(
            client,
            &map.source_floor,
            &map.source_rail,
            &map.source_block,
            &source,
        )
        .await?;
        client.write_u16(&map.source_depth, source.depth).await?;

        steps.push(ExecutionStep::new(
            "write_parameters",
            format!("源 {} 深度 {}", source, source.depth),
        ));
        Ok(())
    }

    async fn on_completed(
        &self,
        client: &dyn IPlcClient,
        map: &SignalMap,
        result: &mut CommandResult,
    ) -> AppResult<()> {
        // 完成信号到达后读取两个托盘存在标志并编码进结果
        let available = client.read_bool(&map.available_pallet).await?;
        let unavailable = client.read_bool(&map.unavailable_pallet).await?;
        result.pallet_available = Some(available);
        result.pallet_unavailable = Some(unavailable);
        info!(
            "📖 盘点结果 [{}]: 托盘存在={}, 托盘缺失={}",
            result.command_id, available, unavailable
        );
        Ok(())
    }

    fn build_success_message(&self, envelope: &CommandEnvelope, has_warning: bool) -> String {
        let source = envelope.source.map(|l| l.to_string()).unwrap_or_default();
        if has_warning {
            format!("盘点任务完成（执行期间出现报警）: 源库位 {}", source)
        } else {
            format!("盘点任务完成: 源库位 {}", source)
        }
    }

    fn build_failure_message(&self, envelope: &CommandEnvelope, error: &ErrorDetail) -> String {
        format!(
            "盘点任务失败: {} - {} (代码 {})",
            envelope.command_id, error.message, error.code
        )
    }

    fn fail_on_alarm_override(&self) -> bool {
        true
    }
}
