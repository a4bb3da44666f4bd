//! 进程日志初始化与基于 tracing 的构建日志

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::traits::{BuildLogger, LogStatus};

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 只写进程日志的构建日志，未配置事件流时使用
#[derive(Debug, Clone)]
pub struct TracingBuildLogger {
    event_id: String,
}

impl TracingBuildLogger {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }
}

#[async_trait]
impl BuildLogger for TracingBuildLogger {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn log(&self, level: tracing::Level, message: &str, step: &str, status: LogStatus) {
        let event_id = self.event_id.as_str();
        let status = status.as_str();
        match level {
            tracing::Level::ERROR => tracing::error!(event_id, step, status, "{}", message),
            tracing::Level::WARN => tracing::warn!(event_id, step, status, "{}", message),
            tracing::Level::INFO => tracing::info!(event_id, step, status, "{}", message),
            _ => tracing::debug!(event_id, step, status, "{}", message),
        }
    }

    async fn close(&self) {}
}
