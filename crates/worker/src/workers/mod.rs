//! 各任务类型的工作器
//!
//! 工作器从任务体解析出参数，执行完整流程后写入结果。出错时由分发器统一
//! 写一条用户可见的错误日志，再调用 [`Worker::on_failure`] 把记录标记为失败。

pub mod app_transfer;
pub mod gc_task;
pub mod image_build;
pub mod market_slug;
pub mod plugin;
pub mod service_check;
pub mod share;
pub mod source_build;

use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::RegistryCredential;
use builder_core::models::{ImageRef, VersionRecord};
use builder_core::{BuildLogger, BuilderError, BuilderResult, LogStatus};
use tracing::warn;

use crate::context::WorkerContext;
use crate::progress::ProgressReporter;
use crate::retry::with_retries;

pub use app_transfer::{ExportAppWorker, ImportAppWorker};
pub use gc_task::GarbageCollectionWorker;
pub use image_build::ImageBuildWorker;
pub use market_slug::MarketSlugWorker;
pub use plugin::{PluginDockerfileBuildWorker, PluginImageBuildWorker};
pub use service_check::ServiceCheckWorker;
pub use share::{ShareImageWorker, ShareSlugWorker};
pub use source_build::SourceBuildWorker;

/// 单次执行的上下文
pub struct WorkerRun {
    pub ctx: Arc<WorkerContext>,
    pub logger: Arc<dyn BuildLogger>,
    pub progress: ProgressReporter,
    pub max_retries: u32,
}

impl WorkerRun {
    /// 按任务类型的重试次数执行
    pub async fn retry<T, F, Fut>(&self, what: &str, op: F) -> BuilderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = BuilderResult<T>>,
    {
        with_retries(
            self.max_retries,
            self.ctx.settings.retry_delay,
            what,
            self.logger.as_ref(),
            op,
        )
        .await
    }

    /// 同时写入构建日志和进度通道
    pub async fn step(&self, message: &str, step: &str, status: LogStatus) {
        self.logger.info(message, step, status).await;
        self.progress.step(message);
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// 构建日志归属的事件
    fn event_id(&self) -> &str;

    async fn run(&self, run: &WorkerRun) -> BuilderResult<()>;

    /// 把任务关联的记录标记为失败
    async fn on_failure(&self, ctx: &WorkerContext, error: &BuilderError) -> BuilderResult<()>;
}

/// 取出版本记录，不存在时按任务参数创建
pub(crate) async fn load_version(
    ctx: &WorkerContext,
    component_id: &str,
    deploy_version: &str,
    event_id: &str,
    kind: &str,
) -> BuilderResult<VersionRecord> {
    ctx.versions
        .get_or_create(VersionRecord::new(
            component_id,
            deploy_version,
            event_id,
            kind,
        ))
        .await
}

/// 把版本标记为失败，已是终态的版本保持不变
pub(crate) async fn fail_version(
    ctx: &WorkerContext,
    component_id: &str,
    deploy_version: &str,
    event_id: &str,
    kind: &str,
) -> BuilderResult<()> {
    let mut record = load_version(ctx, component_id, deploy_version, event_id, kind).await?;
    if record.is_terminal() {
        warn!(component_id, deploy_version, "版本已是终态，不再标记失败");
        return Ok(());
    }
    record.mark_failure();
    ctx.versions.update(&record).await
}

/// 显式凭据优先，其次按镜像域名匹配配置的凭据
pub(crate) fn resolve_credential(
    ctx: &WorkerContext,
    image: &ImageRef,
    user: &str,
    password: &str,
) -> Option<RegistryCredential> {
    if !user.is_empty() {
        return Some(RegistryCredential {
            username: user.to_string(),
            password: password.to_string(),
        });
    }
    let registry = &ctx.settings.registry;
    if builder_core::models::same_registry(&image.domain, &registry.domain) {
        return registry.local_credential();
    }
    registry.credential_for(&image.domain).cloned()
}

/// 必填参数为空时返回 `InvalidTaskParams`
pub(crate) fn require(value: &str, name: &str) -> BuilderResult<()> {
    if value.trim().is_empty() {
        return Err(BuilderError::invalid_params(format!("缺少参数 {name}")));
    }
    Ok(())
}
