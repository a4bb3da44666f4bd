//! 源码构建：获取代码、识别语言、按语言选择构建策略、记录版本并发送升级动作

use std::collections::HashMap;

use async_trait::async_trait;
use builder_core::models::{HostAlias, Task, TaskType};
use builder_core::{BuildRequest, BuilderError, BuilderResult, Language, LogStatus};
use builder_source::lang::require_language;
use builder_source::runtime::detect_runtime;
use builder_source::RepoBuildInfo;
use serde::Deserialize;
use tracing::{info, instrument};

use super::{fail_version, load_version, require, Worker, WorkerRun};
use crate::action::{send_action, UpgradeAction};
use crate::build::strategy_for;
use crate::context::WorkerContext;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceBuildBody {
    pub repo_url: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub tenant_id: String,
    pub service_id: String,
    #[serde(default)]
    pub service_alias: String,
    pub deploy_version: String,
    pub event_id: String,
    /// 创建组件时检测出的语言，为空时重新检测
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub envs: HashMap<String, String>,
    #[serde(default)]
    pub host_aliases: Vec<HostAlias>,
    #[serde(default)]
    pub action: String,
}

pub struct SourceBuildWorker {
    body: SourceBuildBody,
}

impl SourceBuildWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: SourceBuildBody = task.parse_body()?;
        require(&body.repo_url, "repo_url")?;
        require(&body.tenant_id, "tenant_id")?;
        require(&body.service_id, "service_id")?;
        require(&body.deploy_version, "deploy_version")?;
        Ok(Self { body })
    }

    fn kind() -> &'static str {
        TaskType::BuildFromSourceCode.as_str()
    }
}

#[async_trait]
impl Worker for SourceBuildWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(
        service_id = %self.body.service_id,
        deploy_version = %self.body.deploy_version,
    ))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let settings = &ctx.settings;

        let mut record = load_version(
            ctx,
            &body.service_id,
            &body.deploy_version,
            &body.event_id,
            Self::kind(),
        )
        .await?;
        record.repo_url = body.repo_url.clone();
        record.code_branch = body.branch.clone();

        let info = RepoBuildInfo::new(
            &settings.source.source_dir,
            &body.repo_url,
            &body.branch,
            &body.server_type,
            &body.tenant_id,
            &body.service_id,
            Some(body.user.clone()),
            Some(body.password.clone()),
        )?;
        run.progress.step("获取源码");
        let (tree, commit) = ctx.source.acquire(&info, run.logger.as_ref()).await?;
        let build_dir = info.build_path()?;
        if !build_dir.is_dir() {
            return Err(BuilderError::SpecificationViolation(format!(
                "构建目录 {} 不存在",
                info.build_subpath
            )));
        }

        let lang = match Language::parse_lenient(&body.lang) {
            Some(lang) if lang != Language::None => lang,
            _ => require_language(&build_dir)?,
        };
        let runtime = if body.runtime.is_empty() {
            detect_runtime(&build_dir, lang)?.unwrap_or_default()
        } else {
            body.runtime.clone()
        };
        run.step(
            &format!("识别到项目语言 {lang}"),
            "detect-lang",
            LogStatus::Success,
        )
        .await;

        let request = BuildRequest {
            repo_url: info.repository_url.clone(),
            branch: info.branch.clone(),
            source_dir: build_dir,
            cache_dir: settings
                .source
                .component_cache_dir(&body.tenant_id, &body.service_id),
            tgz_dir: settings.source.slug_dir(&body.tenant_id),
            tenant_id: body.tenant_id.clone(),
            component_id: body.service_id.clone(),
            service_alias: body.service_alias.clone(),
            deploy_version: body.deploy_version.clone(),
            event_id: body.event_id.clone(),
            runtime,
            lang,
            build_envs: body.envs.clone(),
            commit: commit.clone(),
            host_aliases: body.host_aliases.clone(),
            logger: run.logger.clone(),
        };

        run.progress.step("构建");
        let strategy = strategy_for(
            lang,
            ctx.containers.clone(),
            &settings.registry,
            &settings.build,
        );
        let response = strategy.build(&request).await?;
        drop(tree);

        record.code_branch = info.branch.clone();
        record.code_version = commit.hash;
        record.commit_msg = commit.message;
        record.author = commit.author;
        record.mark_success(response.medium_type, response.medium_path.clone())?;
        ctx.versions.update(&record).await?;
        info!(medium = %response.medium_path, "源码构建完成");

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
        run.logger.info("构建完成", "last", LogStatus::Success).await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        fail_version(
            ctx,
            &self.body.service_id,
            &self.body.deploy_version,
            &self.body.event_id,
            Self::kind(),
        )
        .await
    }
}
