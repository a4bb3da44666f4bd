use async_trait::async_trait;
use builder_core::models::{DeliveredType, ImageRef, Task, TaskType};
use builder_core::{BuilderError, BuilderResult, LogStatus};
use serde::Deserialize;
use tracing::{info, warn};

use super::{fail_version, load_version, require, resolve_credential, Worker, WorkerRun};
use crate::action::{send_action, UpgradeAction};
use crate::context::WorkerContext;

#[derive(Debug, Clone, Deserialize)]
pub struct ImageBuildBody {
    pub image: String,
    pub tenant_id: String,
    pub service_id: String,
    pub deploy_version: String,
    pub event_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

/// 拉取镜像，重新打标签后推送到内部仓库
pub struct ImageBuildWorker {
    body: ImageBuildBody,
}

impl ImageBuildWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: ImageBuildBody = task.parse_body()?;
        require(&body.image, "image")?;
        require(&body.service_id, "service_id")?;
        require(&body.deploy_version, "deploy_version")?;
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for ImageBuildWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let settings = &ctx.settings;
        let kind = TaskType::BuildFromImage.as_str();
        let mut record = load_version(
            ctx,
            &body.service_id,
            &body.deploy_version,
            &body.event_id,
            kind,
        )
        .await?;

        let source = ImageRef::parse(&body.image)?;
        let source_name = source.to_string();
        let credential = resolve_credential(ctx, &source, &body.user, &body.password);
        let target = settings
            .registry
            .component_image(&body.service_id, &body.deploy_version);
        let local_credential = settings.registry.local_credential();

        run.step(&format!("开始拉取镜像 {source_name}"), "pull-image", LogStatus::Starting)
            .await;
        run.retry("拉取镜像", || {
            ctx.containers
                .pull(&source_name, credential.as_ref(), settings.build.pull_timeout())
        })
        .await?;
        run.step("镜像拉取完成", "pull-image", LogStatus::Success).await;

        ctx.containers.tag(&source_name, &target).await?;
        run.step(&format!("推送镜像 {target}"), "push-image", LogStatus::Starting)
            .await;
        run.retry("推送镜像", || {
            ctx.containers
                .push(&target, local_credential.as_ref(), settings.build.push_timeout())
        })
        .await?;
        run.step("镜像推送完成", "push-image", LogStatus::Success).await;

        if let Err(e) = ctx.containers.remove(&target).await {
            warn!(image = %target, error = %e, "删除本地镜像失败");
        }
        if settings.build.disable_image_cache {
            if let Err(e) = ctx.containers.remove(&source_name).await {
                warn!(image = %source_name, error = %e, "删除源镜像失败");
            }
        }

        record.repo_url = source_name;
        record.mark_success(DeliveredType::Image, target.clone())?;
        ctx.versions.update(&record).await?;
        info!(service_id = %body.service_id, image = %target, "镜像构建完成");

        send_action(
            ctx.queue.as_ref(),
            &settings.worker_topic,
            &body.action,
            UpgradeAction {
                tenant_id: body.tenant_id.clone(),
                service_id: body.service_id.clone(),
                deploy_version: body.deploy_version.clone(),
                event_id: body.event_id.clone(),
            },
        )
        .await?;
        run.logger
            .info("构建完成", "last", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        fail_version(
            ctx,
            &self.body.service_id,
            &self.body.deploy_version,
            &self.body.event_id,
            TaskType::BuildFromImage.as_str(),
        )
        .await
    }
}
