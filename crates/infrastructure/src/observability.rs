use std::net::SocketAddr;

use anyhow::{Context, Result};
use builder_core::config::ObservabilityConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 启动 Prometheus 指标端点
///
/// 未开启指标时不做任何事。需要在 tokio 运行时内调用。
pub fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<()> {
    if !config.metrics_enabled {
        return Ok(());
    }
    let addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标端点失败")?;
    describe_metrics();
    info!("指标端点已启动: http://{}/metrics", addr);
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("builder_task_total", "已接收的任务数");
    metrics::describe_counter!("builder_task_error_total", "执行失败的任务数");
    metrics::describe_counter!("builder_task_back_total", "退回队列的任务数");
    metrics::describe_gauge!("builder_task_inflight", "正在执行的任务数");
    metrics::describe_counter!("builder_gc_deleted_total", "垃圾回收删除的镜像数");
}
