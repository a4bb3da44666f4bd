//! 基于 docker 命令行的容器运行时

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::RegistryCredential;
use builder_core::models::ImageRef;
use builder_core::traits::{ContainerRuntime, ImageBuildOptions, ImageInspect, RunOptions};
use builder_core::{BuilderError, BuilderResult, CommandOutput, CommandRunner, CommandSpec};
use serde::Deserialize;
use tracing::{debug, info, instrument};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(60);
const LOCAL_OP_TIMEOUT: Duration = Duration::from_secs(300);

pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    bin: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    #[serde(default)]
    config: Option<RawImageConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawImageConfig {
    #[serde(default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

impl From<RawInspect> for ImageInspect {
    fn from(raw: RawInspect) -> Self {
        let config = raw.config.unwrap_or(RawImageConfig {
            exposed_ports: None,
            env: None,
            cmd: None,
        });
        let mut exposed_ports: Vec<u16> = config
            .exposed_ports
            .unwrap_or_default()
            .keys()
            .filter_map(|key| key.split('/').next()?.parse().ok())
            .collect();
        exposed_ports.sort_unstable();
        ImageInspect {
            id: raw.id,
            repo_tags: raw.repo_tags.unwrap_or_default(),
            exposed_ports,
            env: config.env.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
        }
    }
}

fn is_missing_image(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("no such image")
        || lower.contains("not found")
        || lower.contains("manifest unknown")
        || lower.contains("does not exist")
}

fn is_auth_error(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("denied")
        || lower.contains("no basic auth credentials")
}

/// 把 pull/push 的失败输出归类
fn transfer_error(image: &str, output: &CommandOutput) -> BuilderError {
    let combined = output.combined();
    if is_auth_error(&combined) {
        BuilderError::ImageAuthRequired(image.to_string())
    } else if is_missing_image(&combined) {
        BuilderError::ImageNotFound(image.to_string())
    } else {
        BuilderError::Registry(format!("{image}: {}", output.tail(5)))
    }
}

/// `docker load` 输出中的镜像名称
pub fn parse_loaded_images(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            line.trim()
                .strip_prefix("Loaded image:")
                .or_else(|| line.trim().strip_prefix("Loaded image ID:"))
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

pub fn build_args(options: &ImageBuildOptions) -> Vec<String> {
    let mut args = vec!["build".to_string(), "-t".to_string(), options.tag.clone()];
    if let Some(dockerfile) = &options.dockerfile {
        args.push("-f".to_string());
        args.push(dockerfile.display().to_string());
    }
    for (key, value) in &options.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={value}"));
    }
    for host in &options.add_hosts {
        args.push("--add-host".to_string());
        args.push(host.clone());
    }
    if options.no_cache {
        args.push("--no-cache".to_string());
    }
    args.push(options.context_dir.display().to_string());
    args
}

pub fn run_args(options: &RunOptions) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string()];
    let envs: &BTreeMap<String, String> = &options.envs;
    for (key, value) in envs {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for volume in &options.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    if let Some(workdir) = &options.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }
    args.push(options.image.clone());
    args.extend(options.args.iter().cloned());
    args
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
        }
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.bin)
    }

    async fn login(&self, image: &str, credential: &RegistryCredential) -> BuilderResult<()> {
        let domain = ImageRef::parse(image)?.domain;
        let spec = self
            .command()
            .args(["login", "--username", credential.username.as_str(), "--password-stdin"])
            .arg(&domain)
            .stdin(credential.password.clone())
            .timeout(LOGIN_TIMEOUT);
        let output = self.runner.run(&spec).await?;
        if !output.is_success() {
            return Err(BuilderError::ImageAuthRequired(domain));
        }
        debug!("已登录镜像仓库 {}", domain);
        Ok(())
    }

    async fn transfer(
        &self,
        action: &str,
        image: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> BuilderResult<()> {
        if let Some(credential) = credential {
            self.login(image, credential).await?;
        }
        let output = self
            .runner
            .run(&self.command().args([action, image]).timeout(timeout))
            .await?;
        if output.is_success() {
            info!("{} {} 完成", action, image);
            Ok(())
        } else {
            Err(transfer_error(image, &output))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    #[instrument(skip(self, credential))]
    async fn pull(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> BuilderResult<()> {
        self.transfer("pull", image, credential, timeout).await
    }

    #[instrument(skip(self, credential))]
    async fn push(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> BuilderResult<()> {
        self.transfer("push", image, credential, timeout).await
    }

    #[instrument(skip(self))]
    async fn tag(&self, source: &str, target: &str) -> BuilderResult<()> {
        let output = self
            .runner
            .run(&self.command().args(["tag", source, target]).timeout(LOCAL_OP_TIMEOUT))
            .await?;
        if output.is_success() {
            Ok(())
        } else if is_missing_image(&output.combined()) {
            Err(BuilderError::ImageNotFound(source.to_string()))
        } else {
            Err(BuilderError::internal(format!(
                "修改镜像标签失败: {}",
                output.tail(3)
            )))
        }
    }

    #[instrument(skip(self))]
    async fn inspect(&self, image: &str) -> BuilderResult<Option<ImageInspect>> {
        let output = self
            .runner
            .run(
                &self
                    .command()
                    .args(["image", "inspect", image])
                    .timeout(LOCAL_OP_TIMEOUT),
            )
            .await?;
        if !output.is_success() {
            if is_missing_image(&output.combined()) {
                return Ok(None);
            }
            return Err(BuilderError::internal(format!(
                "查询镜像失败: {}",
                output.tail(3)
            )));
        }
        let mut images: Vec<RawInspect> = serde_json::from_str(&output.stdout)?;
        Ok(images.pop().map(ImageInspect::from))
    }

    #[instrument(skip(self))]
    async fn remove(&self, image: &str) -> BuilderResult<()> {
        let output = self
            .runner
            .run(&self.command().args(["rmi", image]).timeout(LOCAL_OP_TIMEOUT))
            .await?;
        if output.is_success() || is_missing_image(&output.combined()) {
            Ok(())
        } else {
            Err(BuilderError::internal(format!(
                "删除镜像失败: {}",
                output.tail(3)
            )))
        }
    }

    #[instrument(skip(self, options), fields(tag = %options.tag))]
    async fn build(&self, options: &ImageBuildOptions, timeout: Duration) -> BuilderResult<()> {
        let spec = self
            .command()
            .args(build_args(options))
            .current_dir(&options.context_dir)
            .timeout(timeout);
        let output = self.runner.run(&spec).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(BuilderError::build_failed(output.tail(20)))
        }
    }

    #[instrument(skip(self))]
    async fn save(&self, images: &[String], dest: &Path) -> BuilderResult<()> {
        let spec = self
            .command()
            .arg("save")
            .arg("-o")
            .arg(dest.display().to_string())
            .args(images.iter().cloned());
        let output = self.runner.run(&spec).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(BuilderError::internal(format!(
                "导出镜像失败: {}",
                output.tail(5)
            )))
        }
    }

    #[instrument(skip(self))]
    async fn load(&self, archive: &Path) -> BuilderResult<Vec<String>> {
        let spec = self
            .command()
            .arg("load")
            .arg("-i")
            .arg(archive.display().to_string());
        let output = self.runner.run(&spec).await?;
        if !output.is_success() {
            return Err(BuilderError::internal(format!(
                "导入镜像失败: {}",
                output.tail(5)
            )));
        }
        Ok(parse_loaded_images(&output.stdout))
    }

    #[instrument(skip(self, options), fields(image = %options.image))]
    async fn run(&self, options: &RunOptions) -> BuilderResult<CommandOutput> {
        let mut spec = self.command().args(run_args(options));
        if let Some(timeout) = options.timeout {
            spec = spec.timeout(timeout);
        }
        let output = self.runner.run(&spec).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(BuilderError::build_failed(output.tail(20)))
        }
    }
}
