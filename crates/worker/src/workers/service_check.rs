//! 服务检测：分析源码、镜像或 `docker run` 命令，结果写入键值存储

use async_trait::async_trait;
use builder_core::models::{
    service_check_key, CheckErrorInfo, ImageRef, ServiceCheckResult, ServiceInfo, ServicePort,
    Task,
};
use builder_core::{put_json, BuilderError, BuilderResult, LogStatus};
use builder_source::docker_run::parse_docker_run;
use builder_source::{analyze_project, RepoBuildInfo};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::{require, resolve_credential, Worker, WorkerRun};
use crate::context::WorkerContext;

/// 未指定内存时的默认值（MB）
const DEFAULT_MEMORY_MB: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SourceType {
    #[serde(rename = "sourcecode")]
    SourceCode,
    #[serde(rename = "docker-image")]
    DockerImage,
    #[serde(rename = "docker-run")]
    DockerRun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceCheckBody {
    pub check_uuid: String,
    #[serde(default)]
    pub event_id: String,
    pub source_type: SourceType,
    /// 仓库地址、镜像名或 docker run 命令
    pub source_body: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub server_type: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub struct ServiceCheckWorker {
    body: ServiceCheckBody,
}

impl ServiceCheckWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let mut body: ServiceCheckBody = task.parse_body()?;
        require(&body.check_uuid, "check_uuid")?;
        require(&body.source_body, "source_body")?;
        if body.service_id.is_empty() {
            body.service_id = body.check_uuid.clone();
        }
        Ok(Self { body })
    }

    async fn check_source(&self, run: &WorkerRun) -> BuilderResult<ServiceCheckResult> {
        let ctx = &run.ctx;
        let body = &self.body;
        let info = RepoBuildInfo::new(
            &ctx.settings.source.source_dir,
            &body.source_body,
            &body.branch,
            &body.server_type,
            &body.tenant_id,
            &body.service_id,
            Some(body.username.clone()),
            Some(body.password.clone()),
        )?;
        let (tree, _commit) = ctx.source.acquire(&info, run.logger.as_ref()).await?;
        let report = analyze_project(&info.build_path()?)?;
        drop(tree);
        run.step(
            &format!("源码检测完成，语言 {}", report.language),
            "check-source",
            LogStatus::Success,
        )
        .await;
        Ok(ServiceCheckResult::from_parts(report.issues, report.services))
    }

    /// 镜像不存在或无权访问时返回不合规项，而不是错误
    async fn check_image(
        &self,
        run: &WorkerRun,
        image_name: &str,
        mut service: ServiceInfo,
    ) -> BuilderResult<ServiceCheckResult> {
        let ctx = &run.ctx;
        let image = ImageRef::parse(image_name)?;
        let credential =
            resolve_credential(ctx, &image, &self.body.username, &self.body.password);

        match ctx.registry.exists(&image, credential.as_ref()).await {
            Ok(true) => {}
            Ok(false) => {
                return Ok(ServiceCheckResult::failure(CheckErrorInfo::fatal(
                    format!("镜像 {image} 不存在"),
                    "请确认镜像名称与标签正确",
                )))
            }
            Err(BuilderError::ImageAuthRequired(_)) => {
                return Ok(ServiceCheckResult::failure(CheckErrorInfo::fatal(
                    format!("镜像 {image} 需要认证"),
                    "请提供镜像仓库的用户名和密码",
                )))
            }
            Err(e) => return Err(e),
        }

        let name = image.to_string();
        ctx.containers
            .pull(&name, credential.as_ref(), ctx.settings.build.pull_timeout())
            .await?;
        if let Some(inspect) = ctx.containers.inspect(&name).await? {
            for port in inspect.exposed_ports {
                if !service.ports.iter().any(|p| p.container_port == port) {
                    service.ports.push(ServicePort::http(port));
                }
            }
            for entry in &inspect.env {
                if let Some((key, value)) = entry.split_once('=') {
                    service
                        .envs
                        .entry(key.to_string())
                        .or_insert_with(|| value.to_string());
                }
            }
            if service.cmd.is_empty() {
                service.cmd = inspect.cmd.join(" ");
            }
        }
        service.image = name;
        run.step("镜像检测完成", "check-image", LogStatus::Success)
            .await;
        Ok(ServiceCheckResult::from_parts(Vec::new(), vec![service]))
    }
}

fn image_service() -> ServiceInfo {
    ServiceInfo {
        language: "docker-image".to_string(),
        memory: DEFAULT_MEMORY_MB,
        ..Default::default()
    }
}

/// `512m`、`1g`、`1024` 等写法换算为 MB
pub fn parse_memory_mb(value: &str) -> Option<u32> {
    let value = value.trim().to_ascii_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);
    let (number, factor) = match value.chars().last()? {
        'g' => (&value[..value.len() - 1], 1024.0),
        'm' => (&value[..value.len() - 1], 1.0),
        'k' => (&value[..value.len() - 1], 1.0 / 1024.0),
        _ => (value, 1.0 / (1024.0 * 1024.0)),
    };
    let mb = number.trim().parse::<f64>().ok()? * factor;
    (mb >= 1.0).then_some(mb.round() as u32)
}

#[async_trait]
impl Worker for ServiceCheckWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(check_uuid = %self.body.check_uuid))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let body = &self.body;
        let result = match body.source_type {
            SourceType::SourceCode => self.check_source(run).await?,
            SourceType::DockerImage => {
                self.check_image(run, &body.source_body, image_service())
                    .await?
            }
            SourceType::DockerRun => {
                let command = parse_docker_run(&body.source_body)?;
                let mut service = image_service();
                service.envs = command.envs;
                service.ports = command.ports;
                service.volumes = command.volumes;
                service.cmd = command.args.join(" ");
                if let Some(memory) = command.memory.as_deref() {
                    match parse_memory_mb(memory) {
                        Some(mb) => service.memory = mb,
                        None => warn!(memory, "无法解析内存限制，使用默认值"),
                    }
                }
                self.check_image(run, &command.image, service).await?
            }
        };

        info!(status = ?result.check_status, issues = result.error_infos.len(), "服务检测完成");
        put_json(
            run.ctx.kv.as_ref(),
            &service_check_key(&body.check_uuid),
            &result,
        )
        .await
    }

    async fn on_failure(&self, ctx: &WorkerContext, error: &BuilderError) -> BuilderResult<()> {
        let advice = match error {
            BuilderError::LanguageUnknown => "请确认代码仓库地址与分支正确".to_string(),
            _ => String::new(),
        };
        let result = ServiceCheckResult::failure(CheckErrorInfo::fatal(
            error.user_message(),
            advice,
        ));
        put_json(
            ctx.kv.as_ref(),
            &service_check_key(&self.body.check_uuid),
            &result,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory_mb("512m"), Some(512));
        assert_eq!(parse_memory_mb("1g"), Some(1024));
        assert_eq!(parse_memory_mb("2GB"), Some(2048));
        assert_eq!(parse_memory_mb("1073741824"), Some(1024));
        assert_eq!(parse_memory_mb("abc"), None);
        assert_eq!(parse_memory_mb("1k"), None);
    }
}
