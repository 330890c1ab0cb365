//! 网关可执行入口
//!
//! 加载配置、初始化日志，按配置注册仿真PLC设备并启动协调器，
//! 将结果通知打印到日志，直到收到 Ctrl-C 后优雅停止。

use anyhow::Context;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use wcs_gateway::{
    BarcodeValidationResponse, EmulatedPlcClient, EmulatedPlcConfig, GatewayConfig,
    GatewayCoordinator, IPlcClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 第一个参数为可选的配置文件路径
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref()).context("加载网关配置失败")?;
    wcs_gateway::logging::init_logging(&config.logging);

    info!("🚀 wcs-gateway 启动中 ({} 台设备)", config.devices.len());

    let coordinator = Arc::new(GatewayCoordinator::new());

    for device in &config.devices {
        let client: Arc<dyn IPlcClient> = Arc::new(EmulatedPlcClient::new(EmulatedPlcConfig {
            device_id: device.device_id.clone(),
            host: device.host.clone(),
            port: device.port,
            connect_timeout_ms: device.connect_timeout_ms,
            operation_timeout_ms: device.operation_timeout_ms,
        }));
        let options = device.to_device_options()?;
        let slots = device.to_slot_configurations()?;
        coordinator.register_device(client, options, slots)?;
    }

    // 默认的条码验证协作方：拒绝所有条码，等待上位系统接管
    coordinator.set_barcode_validator_fn(|request| async move {
        warn!("未接入上位验证系统，条码按无效处理: {}", request.barcode);
        Ok(BarcodeValidationResponse::rejected())
    });

    coordinator.start().await.context("启动网关失败")?;

    // 将结果通知打印到日志
    let mut notifications = coordinator.observe_results();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!(
                "📣 任务通知: {} [{}] {} - {}",
                notification.command_id,
                notification.device_id,
                notification.status,
                notification.message
            );
        }
    });

    tokio::signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("收到退出信号");

    coordinator.stop().await;
    printer.abort();
    Ok(())
}
