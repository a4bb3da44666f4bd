//! 插件构建：从镜像或 Dockerfile 源码得到插件镜像，并维护插件构建版本记录

use async_trait::async_trait;
use builder_core::config::RegistryConfig;
use builder_core::models::{ImageRef, PluginBuildVersion, Task};
use builder_core::{BuilderError, BuilderResult, ImageBuildOptions, LogStatus};
use builder_source::dockerfile::Dockerfile;
use builder_source::RepoBuildInfo;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{require, resolve_credential, Worker, WorkerRun};
use crate::context::WorkerContext;

/// 插件镜像名
///
/// 源镜像名以 `plugin` 开头时保留名称，标签为 `<plugin_id>_<version>`；
/// 否则名称为 `plugin_<name>_<plugin_id>`，标签为 `<tag>_<version>`。
pub fn plugin_image_name(
    registry: &RegistryConfig,
    source: &ImageRef,
    plugin_id: &str,
    deploy_version: &str,
) -> String {
    let simple = source.simple_name();
    let name = if simple.starts_with("plugin") {
        format!("{}/{simple}:{plugin_id}_{deploy_version}", registry.domain)
    } else {
        format!(
            "{}/plugin_{simple}_{plugin_id}:{}_{deploy_version}",
            registry.domain, source.tag
        )
    };
    name.to_lowercase()
}

/// 从仓库地址取出仓库名，去掉 `.git` 后缀
fn repository_basename(repo_url: &str) -> &str {
    let trimmed = repo_url.split('?').next().unwrap_or(repo_url);
    let trimmed = trimmed.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    base.strip_suffix(".git").unwrap_or(base)
}

async fn save_status(
    ctx: &WorkerContext,
    plugin_id: &str,
    deploy_version: &str,
    event_id: &str,
    update: impl FnOnce(&mut PluginBuildVersion),
) -> BuilderResult<()> {
    let mut version = ctx
        .plugin_versions
        .get(plugin_id, deploy_version)
        .await?
        .unwrap_or_else(|| PluginBuildVersion::building(plugin_id, deploy_version, event_id));
    update(&mut version);
    ctx.plugin_versions.save(&version).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginImageBody {
    pub plugin_id: String,
    pub image_url: String,
    pub deploy_version: String,
    pub event_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub hub_user: String,
    #[serde(default)]
    pub hub_password: String,
}

pub struct PluginImageBuildWorker {
    body: PluginImageBody,
}

impl PluginImageBuildWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: PluginImageBody = task.parse_body()?;
        require(&body.plugin_id, "plugin_id")?;
        require(&body.image_url, "image_url")?;
        require(&body.deploy_version, "deploy_version")?;
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for PluginImageBuildWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(plugin_id = %self.body.plugin_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let settings = &ctx.settings;
        save_status(ctx, &body.plugin_id, &body.deploy_version, &body.event_id, |_| {}).await?;

        let source = ImageRef::parse(&body.image_url)?;
        let source_name = source.to_string();
        let credential = resolve_credential(ctx, &source, &body.hub_user, &body.hub_password);
        let target = plugin_image_name(
            &settings.registry,
            &source,
            &body.plugin_id,
            &body.deploy_version,
        );

        run.step(
            &format!("开始拉取插件镜像 {source_name}"),
            "pull-image",
            LogStatus::Starting,
        )
        .await;
        run.retry("拉取镜像", || {
            ctx.containers
                .pull(&source_name, credential.as_ref(), settings.build.pull_timeout())
        })
        .await?;
        ctx.containers.tag(&source_name, &target).await?;

        let local_credential = settings.registry.local_credential();
        run.retry("推送镜像", || {
            ctx.containers
                .push(&target, local_credential.as_ref(), settings.build.push_timeout())
        })
        .await?;
        if let Err(e) = ctx.containers.remove(&target).await {
            warn!(image = %target, error = %e, "删除本地镜像失败");
        }

        save_status(ctx, &body.plugin_id, &body.deploy_version, &body.event_id, |v| {
            v.complete(target.clone())
        })
        .await?;
        info!(image = %target, "插件镜像构建完成");
        run.logger
            .info("插件构建完成", "last", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        let body = &self.body;
        save_status(
            ctx,
            &body.plugin_id,
            &body.deploy_version,
            &body.event_id,
            PluginBuildVersion::fail,
        )
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginDockerfileBody {
    pub plugin_id: String,
    #[serde(default)]
    pub repo_url: String,
    /// 旧版任务体使用的字段名
    #[serde(default)]
    pub git_url: String,
    #[serde(default)]
    pub branch: String,
    pub deploy_version: String,
    pub event_id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub struct PluginDockerfileBuildWorker {
    body: PluginDockerfileBody,
}

impl PluginDockerfileBuildWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let mut body: PluginDockerfileBody = task.parse_body()?;
        if body.repo_url.is_empty() {
            body.repo_url = body.git_url.clone();
        }
        require(&body.plugin_id, "plugin_id")?;
        require(&body.repo_url, "repo_url")?;
        require(&body.deploy_version, "deploy_version")?;
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for PluginDockerfileBuildWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(plugin_id = %self.body.plugin_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let settings = &ctx.settings;
        save_status(ctx, &body.plugin_id, &body.deploy_version, &body.event_id, |_| {}).await?;

        let info = RepoBuildInfo::new(
            &settings.source.source_dir,
            &body.repo_url,
            &body.branch,
            "git",
            &body.tenant_id,
            &body.plugin_id,
            Some(body.username.clone()),
            Some(body.password.clone()),
        )?;
        let (tree, _commit) = ctx.source.acquire(&info, run.logger.as_ref()).await?;
        let build_dir = info.build_path()?;
        let dockerfile_path = build_dir.join("Dockerfile");
        if !dockerfile_path.is_file() {
            return Err(BuilderError::SpecificationViolation(
                "插件源码中没有 Dockerfile".to_string(),
            ));
        }
        Dockerfile::load(&dockerfile_path)?;

        let target = format!(
            "{}/plugin_{}_{}:{}",
            settings.registry.domain,
            repository_basename(&info.repository_url),
            body.plugin_id,
            body.deploy_version
        )
        .to_lowercase();
        run.step(&format!("开始构建插件镜像 {target}"), "build-image", LogStatus::Starting)
            .await;
        let options = ImageBuildOptions {
            context_dir: build_dir.clone(),
            dockerfile: Some(dockerfile_path),
            tag: target.clone(),
            no_cache: settings.build.disable_image_cache,
            ..Default::default()
        };
        ctx.containers
            .build(&options, settings.build.build_timeout())
            .await?;
        drop(tree);

        let local_credential = settings.registry.local_credential();
        run.retry("推送镜像", || {
            ctx.containers
                .push(&target, local_credential.as_ref(), settings.build.push_timeout())
        })
        .await?;
        if let Err(e) = ctx.containers.remove(&target).await {
            warn!(image = %target, error = %e, "删除本地镜像失败");
        }

        save_status(ctx, &body.plugin_id, &body.deploy_version, &body.event_id, |v| {
            v.complete(target.clone())
        })
        .await?;
        info!(image = %target, "插件 Dockerfile 构建完成");
        run.logger
            .info("插件构建完成", "last", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        let body = &self.body;
        save_status(
            ctx,
            &body.plugin_id,
            &body.deploy_version,
            &body.event_id,
            PluginBuildVersion::fail,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_image_name() {
        let registry = RegistryConfig::default();
        let source = ImageRef::parse("kato/plugin-mesh:1.2").unwrap();
        assert_eq!(
            plugin_image_name(&registry, &source, "P1", "v1"),
            "hub.kato.me/plugin-mesh:p1_v1"
        );

        let source = ImageRef::parse("nginx").unwrap();
        assert_eq!(
            plugin_image_name(&registry, &source, "p1", "v1"),
            "hub.kato.me/plugin_nginx_p1:latest_v1"
        );
    }

    #[test]
    fn test_repository_basename() {
        assert_eq!(repository_basename("https://git.example.com/a/demo.git"), "demo");
        assert_eq!(repository_basename("https://git.example.com/a/demo/?dir=x"), "demo");
    }
}
