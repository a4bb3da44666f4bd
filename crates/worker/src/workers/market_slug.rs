use async_trait::async_trait;
use builder_core::models::{DeliveredType, Task, TaskType};
use builder_core::{BuilderError, BuilderResult, LogStatus};
use serde::Deserialize;
use tracing::info;

use super::{fail_version, load_version, require, Worker, WorkerRun};
use crate::action::{send_action, UpgradeAction};
use crate::context::WorkerContext;

#[derive(Debug, Clone, Deserialize)]
pub struct MarketSlugBody {
    pub tenant_id: String,
    pub service_id: String,
    pub deploy_version: String,
    pub event_id: String,
    /// 应用市场中 slug 的位置
    pub slug_path: String,
    #[serde(default)]
    pub action: String,
}

/// 从应用市场取回 slug 作为新版本
pub struct MarketSlugWorker {
    body: MarketSlugBody,
}

impl MarketSlugWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: MarketSlugBody = task.parse_body()?;
        require(&body.service_id, "service_id")?;
        require(&body.deploy_version, "deploy_version")?;
        require(&body.slug_path, "slug_path")?;
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for MarketSlugWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let mut record = load_version(
            ctx,
            &body.service_id,
            &body.deploy_version,
            &body.event_id,
            TaskType::BuildFromMarketSlug.as_str(),
        )
        .await?;

        let dest = ctx
            .settings
            .source
            .slug_dir(&body.tenant_id)
            .join(&body.service_id)
            .join(format!("{}.tgz", body.deploy_version));
        run.step(
            &format!("开始获取应用市场 slug {}", body.slug_path),
            "get-slug",
            LogStatus::Starting,
        )
        .await;
        run.retry("获取 slug", || ctx.slugs.fetch(&body.slug_path, &dest))
            .await?;
        run.step("slug 获取完成", "get-slug", LogStatus::Success).await;

        let delivered = dest.display().to_string();
        record.mark_success(DeliveredType::Slug, delivered.clone())?;
        ctx.versions.update(&record).await?;
        info!(service_id = %body.service_id, slug = %delivered, "应用市场 slug 版本已创建");

        send_action(
            ctx.queue.as_ref(),
            &ctx.settings.worker_topic,
            &body.action,
            UpgradeAction {
                tenant_id: body.tenant_id.clone(),
                service_id: body.service_id.clone(),
                deploy_version: body.deploy_version.clone(),
                event_id: body.event_id.clone(),
            },
        )
        .await?;
        run.logger.info("构建完成", "last", LogStatus::Success).await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        fail_version(
            ctx,
            &self.body.service_id,
            &self.body.deploy_version,
            &self.body.event_id,
            TaskType::BuildFromMarketSlug.as_str(),
        )
        .await
    }
}
