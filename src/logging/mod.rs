//! 日志初始化模块
//!
//! 基于 env_logger 的统一日志配置：
//! 级别来自配置文件，`RUST_LOG` 环境变量优先。

use crate::utils::config::LoggingSettings;
use log::LevelFilter;
use std::io::Write;
use std::str::FromStr;

/// 按配置初始化全局日志
/// 重复初始化会被静默忽略（便于测试）
pub fn init_logging(settings: &LoggingSettings) {
    let level = LevelFilter::from_str(&settings.level).unwrap_or(LevelFilter::Info);
    let show_module_path = settings.show_module_path;

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.to_string()),
    );
    builder.format(move |buf, record| {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        if show_module_path {
            writeln!(
                buf,
                "[{} {} {}] {}",
                timestamp,
                record.level(),
                record.module_path().unwrap_or("-"),
                record.args()
            )
        } else {
            writeln!(buf, "[{} {}] {}", timestamp, record.level(), record.args())
        }
    });
    // 已初始化时忽略错误
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 重复初始化不应panic
    #[test]
    fn test_init_logging_is_idempotent() {
        let settings = LoggingSettings::default();
        init_logging(&settings);
        init_logging(&settings);
    }
}
