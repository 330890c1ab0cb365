//! 入库任务策略
//!
//! 入库任务提交时不携带库位，目标库位在条码验证后注入：
//! 触发后轮询10个单字符条码寄存器，读到条码后交给外部验证协作方，
//! 按验证结果写入有效/无效标志及任务参数。
//! 验证响应为单次使用状态，保留到完成信号消费为止。

use crate::domain::services::{ExecutionContext, IBarcodeValidator, ICommandStrategy};
use crate::infrastructure::plc::{IPlcClient, SignalMap};
use crate::models::{
    BarcodeValidationRequest, BarcodeValidationResponse, CommandEnvelope, CommandResult,
    CommandType, ErrorDetail, ExecutionStep,
};
use crate::utils::error::{AppError, AppResult};
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

use super::command_strategies::write_location_registers;

/// 条码寄存器轮询间隔
const BARCODE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// 条码验证协作方调用期限
const BARCODE_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// 空条码占位（全部寄存器为 "0"）
const EMPTY_BARCODE: &str = "0000000000";

/// 入库任务策略
pub struct InboundStrategy {
    /// 单次使用的验证响应，保留到完成信号消费
    validation_response: Mutex<Option<BarcodeValidationResponse>>,
}

impl InboundStrategy {
    pub fn new() -> Self {
        Self {
            validation_response: Mutex::new(None),
        }
    }

    /// 读取10个条码寄存器并拼接
    /// 长度不为1的字符在该位置截断条码
    async fn read_barcode(&self, client: &dyn IPlcClient, map: &SignalMap) -> AppResult<String> {
        let mut barcode = String::new();
        for address in &map.barcode_chars {
            let ch = client.read_string(address).await?;
            if ch.chars().count() != 1 {
                break;
            }
            barcode.push_str(&ch);
        }
        Ok(barcode)
    }

    /// 轮询条码寄存器直到读到非空条码
    async fn wait_for_barcode(&self, ctx: &ExecutionContext<'_>) -> AppResult<String> {
        loop {
            let barcode = self.read_barcode(ctx.client, ctx.map).await?;
            if !barcode.is_empty() && barcode != EMPTY_BARCODE {
                return Ok(barcode);
            }
            tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return Err(AppError::command_execution_error(
                        &ctx.envelope.command_id,
                        "未读取到有效条码",
                    ));
                }
                _ = sleep(BARCODE_POLL_INTERVAL) => {}
            }
        }
    }

    /// 调用外部验证协作方，调用期限5分钟
    /// 超时与调用错误都视为无效响应
    async fn request_validation(
        &self,
        validator: &dyn IBarcodeValidator,
        request: BarcodeValidationRequest,
    ) -> BarcodeValidationResponse {
        let command_id = request.command_id.clone();
        match tokio::time::timeout(BARCODE_VALIDATION_TIMEOUT, validator.validate(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("⚠️ 条码验证调用失败 [{}]: {}", command_id, e);
                BarcodeValidationResponse::rejected()
            }
            Err(_) => {
                warn!("⚠️ 条码验证超时 [{}]", command_id);
                BarcodeValidationResponse::rejected()
            }
        }
    }
}

impl Default for InboundStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ICommandStrategy for InboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Inbound
    }

    fn trigger_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.inbound_trigger
    }

    fn completion_address<'a>(&self, map: &'a SignalMap) -> &'a str {
        &map.inbound_completed
    }

    fn validate(&self, envelope: &CommandEnvelope) -> AppResult<()> {
        if envelope.command_type != CommandType::Inbound {
            return Err(AppError::validation_error(format!(
                "策略不支持的任务类型: 期望 Inbound, 实际 {}",
                envelope.command_type
            )));
        }
        // 源库位与目标库位在条码验证后注入，提交时不作要求
        Ok(())
    }

    async fn write_parameters(
        &self,
        _client: &dyn IPlcClient,
        _map: &SignalMap,
        _envelope: &CommandEnvelope,
        _steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<()> {
        // 入库参数在触发后阶段按验证结果写入
        Ok(())
    }

    async fn post_trigger(
        &self,
        ctx: &ExecutionContext<'_>,
        steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<Option<CommandResult>> {
        // (a) 轮询条码寄存器
        let barcode = self.wait_for_barcode(ctx).await?;
        info!("📦 读取到条码 [{}]: {}", ctx.envelope.command_id, barcode);
        steps.push(ExecutionStep::new("read_barcode", barcode.clone()));

        // (b) 交给外部验证协作方
        let response = match &ctx.barcode_validator {
            Some(validator) => {
                let request = BarcodeValidationRequest {
                    command_id: ctx.envelope.command_id.clone(),
                    device_id: ctx.device_id.to_string(),
                    barcode: barcode.clone(),
                };
                self.request_validation(validator.as_ref(), request).await
            }
            None => {
                warn!("⚠️ 未安装条码验证协作方，条码按无效处理 [{}]", ctx.envelope.command_id);
                BarcodeValidationResponse::rejected()
            }
        };

        if !response.is_usable() {
            // (c) 无效响应：写入无效标志后继续，最终状态由PLC决定
            info!("❌ 条码验证未通过 [{}]: {}", ctx.envelope.command_id, barcode);
            ctx.client.write_bool(&ctx.map.barcode_invalid, true).await?;
            ctx.client.write_bool(&ctx.map.barcode_valid, false).await?;
            steps.push(ExecutionStep::new("barcode_rejected", barcode));
            return Ok(None);
        }

        // (d) 有效响应：写入有效标志与任务参数
        let destination = response
            .destination
            .ok_or_else(|| AppError::validation_error("验证响应缺少目标库位"))?;
        let gate_number = response
            .gate_number
            .ok_or_else(|| AppError::validation_error("验证响应缺少出入口编号"))?;
        let enter_direction = response
            .enter_direction
            .unwrap_or(ctx.envelope.enter_direction);

        info!(
            "✅ 条码验证通过 [{}]: {} -> {} 口 {}",
            ctx.envelope.command_id, barcode, destination, gate_number
        );
        ctx.client.write_bool(&ctx.map.barcode_valid, true).await?;
        ctx.client.write_bool(&ctx.map.barcode_invalid, false).await?;
        write_location_registers(
            ctx.client,
            &ctx.map.dest_floor,
            &ctx.map.dest_rail,
            &ctx.map.dest_block,
            &destination,
        )
        .await?;
        ctx.client
            .write_u16(&ctx.map.gate_number, gate_number)
            .await?;
        ctx.client
            .write_bool(&ctx.map.enter_direction, enter_direction.as_plc_bool())
            .await?;
        steps.push(ExecutionStep::new(
            "barcode_validated",
            format!("{} -> {} 口 {}", barcode, destination, gate_number),
        ));

        *self.validation_response.lock().unwrap() = Some(response);
        Ok(None)
    }

    async fn on_completed(
        &self,
        _client: &dyn IPlcClient,
        _map: &SignalMap,
        result: &mut CommandResult,
    ) -> AppResult<()> {
        // 完成信号消费单次使用的验证响应
        if let Some(response) = self.validation_response.lock().unwrap().take() {
            if let Some(destination) = response.destination {
                result.steps.push(ExecutionStep::new(
                    "destination_assigned",
                    destination.to_string(),
                ));
            }
        }
        Ok(())
    }

    fn build_success_message(&self, envelope: &CommandEnvelope, has_warning: bool) -> String {
        if has_warning {
            format!("入库任务完成（执行期间出现报警）: {}", envelope.command_id)
        } else {
            format!("入库任务完成: {}", envelope.command_id)
        }
    }

    fn build_failure_message(&self, envelope: &CommandEnvelope, error: &ErrorDetail) -> String {
        format!(
            "入库任务失败: {} - {} (代码 {})",
            envelope.command_id, error.message, error.code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::FnBarcodeValidator;
    use crate::infrastructure::plc::{MockPlcClient, SignalMapTemplate};
    use crate::models::{Direction, Location};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn preset_barcode(client: &MockPlcClient, map: &crate::infrastructure::plc::SignalMap, barcode: &str) {
        for (i, ch) in barcode.chars().enumerate() {
            client.preset_read_value(&map.barcode_chars[i], Value::String(ch.to_string()));
        }
    }

    fn context<'a>(
        client: &'a MockPlcClient,
        map: &'a crate::infrastructure::plc::SignalMap,
        envelope: &'a CommandEnvelope,
        validator: Option<Arc<dyn IBarcodeValidator>>,
    ) -> ExecutionContext<'a> {
        ExecutionContext {
            client,
            map,
            envelope,
            device_id: "D1",
            slot_id: 1,
            cancellation: CancellationToken::new(),
            barcode_validator: validator,
        }
    }

    /// 有效条码：写入有效标志、目标库位、出入口和方向
    #[tokio::test]
    async fn test_post_trigger_valid_barcode() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        preset_barcode(&client, &map, "1234567890");

        let validator: Arc<dyn IBarcodeValidator> = Arc::new(FnBarcodeValidator::new(|req| async move {
            assert_eq!(req.barcode, "1234567890");
            Ok(BarcodeValidationResponse::accepted(
                Location::new(2, 1, 4),
                3,
                Direction::Bottom,
            ))
        }));

        let strategy = InboundStrategy::new();
        let envelope = CommandEnvelope::new("T1", CommandType::Inbound);
        let ctx = context(&client, &map, &envelope, Some(validator));
        let mut steps = Vec::new();

        let outcome = strategy.post_trigger(&ctx, &mut steps).await.unwrap();
        assert!(outcome.is_none());

        assert_eq!(client.writes_to(&map.barcode_valid), vec![Value::Bool(true)]);
        assert_eq!(client.writes_to(&map.barcode_invalid), vec![Value::Bool(false)]);
        assert_eq!(client.writes_to(&map.dest_floor), vec![Value::from(2u16)]);
        assert_eq!(client.writes_to(&map.dest_rail), vec![Value::from(1u16)]);
        assert_eq!(client.writes_to(&map.dest_block), vec![Value::from(4u16)]);
        assert_eq!(client.writes_to(&map.gate_number), vec![Value::from(3u16)]);
        assert_eq!(client.writes_to(&map.enter_direction), vec![Value::Bool(false)]);
    }

    /// 被拒绝的条码：写入无效标志后继续执行
    #[tokio::test]
    async fn test_post_trigger_rejected_barcode() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        preset_barcode(&client, &map, "1234567890");

        let validator: Arc<dyn IBarcodeValidator> = Arc::new(FnBarcodeValidator::new(
            |_req| async move { Ok(BarcodeValidationResponse::rejected()) },
        ));

        let strategy = InboundStrategy::new();
        let envelope = CommandEnvelope::new("T1", CommandType::Inbound);
        let ctx = context(&client, &map, &envelope, Some(validator));
        let mut steps = Vec::new();

        let outcome = strategy.post_trigger(&ctx, &mut steps).await.unwrap();
        // 无效条码不提前终止，最终状态由PLC决定
        assert!(outcome.is_none());
        assert_eq!(client.writes_to(&map.barcode_invalid), vec![Value::Bool(true)]);
        assert_eq!(client.writes_to(&map.barcode_valid), vec![Value::Bool(false)]);
        assert!(!client.was_address_written(&map.dest_floor));
    }

    /// 缺少目标库位的接受响应按无效处理
    #[tokio::test]
    async fn test_post_trigger_response_without_destination() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        preset_barcode(&client, &map, "ABCDEFGHIJ");

        let validator: Arc<dyn IBarcodeValidator> = Arc::new(FnBarcodeValidator::new(|_req| async move {
            Ok(BarcodeValidationResponse {
                is_valid: true,
                destination: None,
                gate_number: Some(2),
                enter_direction: None,
            })
        }));

        let strategy = InboundStrategy::new();
        let envelope = CommandEnvelope::new("T1", CommandType::Inbound);
        let ctx = context(&client, &map, &envelope, Some(validator));
        let mut steps = Vec::new();

        strategy.post_trigger(&ctx, &mut steps).await.unwrap();
        assert_eq!(client.writes_to(&map.barcode_invalid), vec![Value::Bool(true)]);
    }

    /// 全零条码视为未读到条码，取消后返回错误
    #[tokio::test]
    async fn test_all_zero_barcode_keeps_polling_until_cancelled() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        preset_barcode(&client, &map, "0000000000");

        let strategy = InboundStrategy::new();
        let envelope = CommandEnvelope::new("T1", CommandType::Inbound);
        let mut ctx = context(&client, &map, &envelope, None);
        let token = CancellationToken::new();
        ctx.cancellation = token.clone();

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            token.cancel();
        });

        let mut steps = Vec::new();
        let result = strategy.post_trigger(&ctx, &mut steps).await;
        assert!(result.is_err());
        cancel.await.unwrap();
    }

    /// 长度不为1的字符在该位置截断条码
    #[tokio::test]
    async fn test_barcode_truncated_at_multichar_register() {
        let client = MockPlcClient::new_for_testing("D1");
        client.connect().await.unwrap();
        let map = SignalMapTemplate::default().bind(1).unwrap();
        client.preset_read_value(&map.barcode_chars[0], Value::String("1".to_string()));
        client.preset_read_value(&map.barcode_chars[1], Value::String("2".to_string()));
        client.preset_read_value(&map.barcode_chars[2], Value::String("34".to_string()));
        client.preset_read_value(&map.barcode_chars[3], Value::String("5".to_string()));

        let strategy = InboundStrategy::new();
        let barcode = strategy.read_barcode(&client, &map).await.unwrap();
        assert_eq!(barcode, "12");
    }
}
