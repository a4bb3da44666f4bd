//! 分享：把内部镜像或 slug 推送到外部仓库，并把结果写入键值存储

use async_trait::async_trait;
use builder_core::config::RegistryCredential;
use builder_core::models::{share_result_key, ImageRef, ShareResult, ShareStatus, Task};
use builder_core::{put_json, BuilderError, BuilderResult, LogStatus};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{require, resolve_credential, Worker, WorkerRun};
use crate::context::WorkerContext;

async fn record_share(ctx: &WorkerContext, share_id: &str, status: ShareStatus) -> BuilderResult<()> {
    let key = share_result_key(&ctx.settings.product, share_id);
    put_json(
        ctx.kv.as_ref(),
        &key,
        &ShareResult {
            share_id: share_id.to_string(),
            status,
        },
    )
    .await
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShareImageInfo {
    /// 目标是可信仓库时需要先创建仓库
    #[serde(default)]
    pub is_trust: bool,
    #[serde(default)]
    pub hub_user: String,
    #[serde(default)]
    pub hub_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareImageBody {
    pub share_id: String,
    pub local_image_name: String,
    pub image_name: String,
    #[serde(default)]
    pub plugin_id: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub image_info: ShareImageInfo,
}

/// 分享组件镜像或插件镜像
pub struct ShareImageWorker {
    body: ShareImageBody,
}

impl ShareImageWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: ShareImageBody = task.parse_body()?;
        require(&body.share_id, "share_id")?;
        require(&body.local_image_name, "local_image_name")?;
        require(&body.image_name, "image_name")?;
        Ok(Self { body })
    }

    /// 可信仓库中目标仓库不存在时先创建
    async fn ensure_trusted_repository(
        &self,
        run: &WorkerRun,
        target: &ImageRef,
        credential: Option<&RegistryCredential>,
    ) -> BuilderResult<()> {
        let credential = credential.ok_or_else(|| {
            BuilderError::ImageAuthRequired(format!("推送到可信仓库 {} 需要账号", target.domain))
        })?;
        let (namespace, name) = match target.repository.rsplit_once('/') {
            Some((namespace, name)) => (namespace, name),
            None => ("", target.repository.as_str()),
        };
        let trusted = &run.ctx.trusted;
        if trusted
            .repository_exists(&target.domain, namespace, name, credential)
            .await?
        {
            return Ok(());
        }
        let description = if self.body.plugin_id.is_empty() {
            format!("shared from {}", self.body.local_image_name)
        } else {
            format!("plugin {}", self.body.plugin_id)
        };
        trusted
            .create_repository(&target.domain, namespace, name, &description, credential)
            .await?;
        run.step(
            &format!("已在可信仓库创建 {namespace}/{name}"),
            "share-image",
            LogStatus::None,
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl Worker for ShareImageWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(share_id = %self.body.share_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let build = &ctx.settings.build;

        let source = ImageRef::parse(&body.local_image_name)?;
        let source_name = source.to_string();
        let target = ImageRef::parse(&body.image_name)?;
        let target_name = target.to_string();
        let source_credential = resolve_credential(ctx, &source, "", "");
        let target_credential = resolve_credential(
            ctx,
            &target,
            &body.image_info.hub_user,
            &body.image_info.hub_password,
        );

        if body.image_info.is_trust {
            self.ensure_trusted_repository(run, &target, target_credential.as_ref())
                .await?;
        }

        run.step(
            &format!("开始拉取镜像 {source_name}"),
            "share-image",
            LogStatus::Starting,
        )
        .await;
        run.retry("拉取镜像", || {
            ctx.containers
                .pull(&source_name, source_credential.as_ref(), build.pull_timeout())
        })
        .await?;
        if source_name != target_name {
            ctx.containers.tag(&source_name, &target_name).await?;
        }

        run.step(
            &format!("推送镜像到 {target_name}"),
            "share-image",
            LogStatus::None,
        )
        .await;
        run.retry("推送镜像", || {
            ctx.containers
                .push(&target_name, target_credential.as_ref(), build.push_timeout())
        })
        .await?;
        if source_name != target_name {
            if let Err(e) = ctx.containers.remove(&target_name).await {
                warn!(image = %target_name, error = %e, "删除本地镜像失败");
            }
        }

        record_share(ctx, &body.share_id, ShareStatus::Success).await?;
        info!(image = %target_name, "镜像分享完成");
        run.step("镜像分享完成", "share-image", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        record_share(ctx, &self.body.share_id, ShareStatus::Failure).await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareSlugBody {
    pub share_id: String,
    #[serde(default)]
    pub event_id: String,
    pub local_slug_path: String,
    /// 目标位置
    pub slug_path: String,
}

pub struct ShareSlugWorker {
    body: ShareSlugBody,
}

impl ShareSlugWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: ShareSlugBody = task.parse_body()?;
        require(&body.share_id, "share_id")?;
        require(&body.local_slug_path, "local_slug_path")?;
        require(&body.slug_path, "slug_path")?;
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for ShareSlugWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(share_id = %self.body.share_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let local = std::path::Path::new(&body.local_slug_path);
        if !tokio::fs::try_exists(local).await.unwrap_or(false) {
            return Err(BuilderError::build_failed(format!(
                "slug 文件 {} 不存在",
                body.local_slug_path
            )));
        }
        run.step(
            &format!("开始上传 slug 到 {}", body.slug_path),
            "share-slug",
            LogStatus::Starting,
        )
        .await;
        run.retry("上传 slug", || ctx.slugs.upload(local, &body.slug_path))
            .await?;
        record_share(ctx, &body.share_id, ShareStatus::Success).await?;
        run.step("slug 分享完成", "share-slug", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        record_share(ctx, &self.body.share_id, ShareStatus::Failure).await
    }
}
