use std::time::Duration;

use anyhow::{Context, Result};
use builder_core::config::AppConfig;
use builder_core::logging::init_logging;
use clap::{Arg, Command};
use kato_builder::app::Application;
use kato_builder::shutdown::{wait_for_signal, ShutdownManager};
use tracing::{error, info, warn};

/// 等待执行中任务退回的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("kato-builder")
        .version(env!("CARGO_PKG_VERSION"))
        .about("应用构建与制品流水线服务")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时按默认位置查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("默认位置", String::as_str)))?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    info!(version = env!("CARGO_PKG_VERSION"), "启动构建服务");

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let mut app_handle = tokio::spawn(app.run(shutdown_rx));

    tokio::select! {
        _ = wait_for_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut app_handle).await {
                Ok(Ok(Ok(()))) => info!("构建服务已优雅关闭"),
                Ok(Ok(Err(e))) => error!("构建服务关闭时发生错误: {e:#}"),
                Ok(Err(e)) => error!("构建服务任务异常退出: {e}"),
                Err(_) => warn!("构建服务关闭超时，强制退出"),
            }
        }
        result = &mut app_handle => {
            result.context("构建服务任务异常退出")??;
        }
    }

    info!("构建服务已退出");
    Ok(())
}
