//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化（按天滚动，保留固定个数的历史文件）

use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::fs;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "pcs-transfer";

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 创建按天滚动的日志文件写入器
fn build_file_appender(config: &LogConfig) -> Result<RollingFileAppender> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("创建日志目录失败: {:?}", config.log_dir))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.retention_days.max(1))
        .build(&config.log_dir)
        .context("创建日志文件写入器失败")
}

/// 初始化日志系统
///
/// RUST_LOG 环境变量优先于配置中的级别。
/// 文件输出初始化失败时回退到仅控制台输出。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(true);

    let appender = if config.enabled {
        match build_file_appender(config) {
            Ok(appender) => Some(appender),
            Err(e) => {
                eprintln!("{:#}, 回退到仅控制台输出", e);
                None
            }
        }
    } else {
        None
    };

    match appender {
        Some(appender) => {
            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);

            // 文件输出层（不带 ANSI 颜色）
            let file_layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
                .with_ansi(false)
                .with_writer(non_blocking);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();

            info!(
                "日志系统初始化完成: 目录={:?}, 保留文件数={}, 级别={}",
                config.log_dir, config.retention_days, config.level
            );

            LogGuard {
                _file_guard: Some(file_guard),
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();

            info!("日志系统初始化完成（仅控制台输出）");

            LogGuard { _file_guard: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_log_config() {
        let config = LogConfig::default();
        assert!(config.enabled);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_build_file_appender_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            log_dir: dir.path().join("nested/logs"),
            ..Default::default()
        };
        assert!(build_file_appender(&config).is_ok());
        assert!(config.log_dir.is_dir());
    }
}
