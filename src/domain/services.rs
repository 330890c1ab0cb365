//! # 核心域接口定义
//!
//! ## 业务说明
//! 定义调度与执行链路上的关键接口：
//! - **任务策略接口**: 每种任务类型一个策略，封装该类型的PLC交互协议
//! - **条码验证协作方**: 入库任务读到条码后的外部验证接口
//! - **仓库布局协作方**: 任务提交前的库位合法性校验接口
//!
//! 策略除入库外全部无状态；入库策略持有单次使用的验证响应，
//! 直到完成信号消费为止。

use crate::infrastructure::plc::{IPlcClient, SignalMap};
use crate::models::{
    BarcodeValidationRequest, BarcodeValidationResponse, CommandEnvelope, CommandResult,
    CommandType, ErrorDetail, ExecutionStep, Location,
};
use crate::utils::error::AppResult;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 策略执行上下文
/// 聚合一次任务执行所需的全部协作对象，避免方法签名膨胀
pub struct ExecutionContext<'a> {
    /// 设备的PLC客户端
    pub client: &'a dyn IPlcClient,
    /// 工位的信号表
    pub map: &'a SignalMap,
    /// 正在执行的任务信封
    pub envelope: &'a CommandEnvelope,
    /// 设备ID
    pub device_id: &'a str,
    /// 工位ID
    pub slot_id: u16,
    /// 本次执行的取消令牌（与工位关闭令牌联动）
    pub cancellation: CancellationToken,
    /// 条码验证协作方（仅入库任务需要）
    pub barcode_validator: Option<Arc<dyn IBarcodeValidator>>,
}

/// 任务策略接口
///
/// 每个策略负责编码一种任务类型的PLC交互协议：
/// 参数写入、触发/完成信号选择以及可选的前后置阶段。
/// 前后置阶段返回 `Ok(None)` 表示继续执行，返回 `Ok(Some(result))`
/// 表示以该结果提前终止。
#[async_trait]
pub trait ICommandStrategy: Send + Sync {
    /// 返回策略支持的任务类型
    fn command_type(&self) -> CommandType;

    /// 返回本任务类型写入的触发信号地址
    fn trigger_address<'a>(&self, map: &'a SignalMap) -> &'a str;

    /// 返回本任务类型监视的完成信号地址
    fn completion_address<'a>(&self, map: &'a SignalMap) -> &'a str;

    /// 验证任务信封
    /// 任务类型不匹配或缺少必需库位时返回验证错误
    fn validate(&self, envelope: &CommandEnvelope) -> AppResult<()>;

    /// 写入任务参数寄存器（库位、出入口、方向等）
    async fn write_parameters(
        &self,
        client: &dyn IPlcClient,
        map: &SignalMap,
        envelope: &CommandEnvelope,
        steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<()>;

    /// 触发前阶段（可选）
    async fn pre_trigger(
        &self,
        _ctx: &ExecutionContext<'_>,
        _steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<Option<CommandResult>> {
        Ok(None)
    }

    /// 触发后阶段（可选）
    async fn post_trigger(
        &self,
        _ctx: &ExecutionContext<'_>,
        _steps: &mut Vec<ExecutionStep>,
    ) -> AppResult<Option<CommandResult>> {
        Ok(None)
    }

    /// 完成信号到达后的结果补充阶段（可选）
    /// 盘点任务在此读取托盘存在标志
    async fn on_completed(
        &self,
        _client: &dyn IPlcClient,
        _map: &SignalMap,
        _result: &mut CommandResult,
    ) -> AppResult<()> {
        Ok(())
    }

    /// 构建成功消息
    fn build_success_message(&self, envelope: &CommandEnvelope, has_warning: bool) -> String;

    /// 构建失败消息
    fn build_failure_message(&self, envelope: &CommandEnvelope, error: &ErrorDetail) -> String;

    /// 报警处理策略覆盖
    /// 返回 true 时任何报警都立即终止任务，无视设备的报警即失败配置
    fn fail_on_alarm_override(&self) -> bool {
        false
    }
}

/// 条码验证协作方接口
/// 必须支持按任务ID并发调用；核心以5分钟期限约束每次调用
#[async_trait]
pub trait IBarcodeValidator: Send + Sync {
    /// 验证条码并返回目标库位分配
    async fn validate(
        &self,
        request: BarcodeValidationRequest,
    ) -> AppResult<BarcodeValidationResponse>;
}

/// 条码验证函数适配器
/// 允许客户端以异步闭包形式安装验证协作方
pub struct FnBarcodeValidator {
    func: Box<
        dyn Fn(
                BarcodeValidationRequest,
            )
                -> Pin<Box<dyn Future<Output = AppResult<BarcodeValidationResponse>> + Send>>
            + Send
            + Sync,
    >,
}

impl FnBarcodeValidator {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(BarcodeValidationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<BarcodeValidationResponse>> + Send + 'static,
    {
        Self {
            func: Box::new(move |request| Box::pin(func(request))),
        }
    }
}

#[async_trait]
impl IBarcodeValidator for FnBarcodeValidator {
    async fn validate(
        &self,
        request: BarcodeValidationRequest,
    ) -> AppResult<BarcodeValidationResponse> {
        (self.func)(request).await
    }
}

/// 仓库布局协作方接口
/// 任务提交前校验库位是否存在于仓库布局中
#[async_trait]
pub trait ILayoutValidator: Send + Sync {
    /// 校验库位合法性，非法库位返回验证错误
    async fn validate_location(&self, location: &Location) -> AppResult<()>;
}

/// 接受所有库位的布局校验实现
/// 未安装外部布局协作方时的默认行为
pub struct AcceptAllLayoutValidator;

#[async_trait]
impl ILayoutValidator for AcceptAllLayoutValidator {
    async fn validate_location(&self, _location: &Location) -> AppResult<()> {
        Ok(())
    }
}
