use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{config::RegistryCredential, process::CommandOutput, BuilderResult};

/// 镜像构建参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuildOptions {
    pub context_dir: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub tag: String,
    pub build_args: BTreeMap<String, String>,
    pub no_cache: bool,
    /// `host:ip` 形式
    pub add_hosts: Vec<String>,
}

/// 镜像元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInspect {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Vec<String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
}

/// 一次性容器的运行参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub image: String,
    pub args: Vec<String>,
    pub envs: BTreeMap<String, String>,
    /// `host:container` 形式
    pub volumes: Vec<String>,
    pub workdir: Option<String>,
    pub timeout: Option<Duration>,
}

/// 容器运行时
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> BuilderResult<()>;

    async fn push(
        &self,
        image: &str,
        credential: Option<&RegistryCredential>,
        timeout: Duration,
    ) -> BuilderResult<()>;

    async fn tag(&self, source: &str, target: &str) -> BuilderResult<()>;

    /// 镜像不存在时返回 `None`
    async fn inspect(&self, image: &str) -> BuilderResult<Option<ImageInspect>>;

    async fn remove(&self, image: &str) -> BuilderResult<()>;

    async fn build(&self, options: &ImageBuildOptions, timeout: Duration) -> BuilderResult<()>;

    async fn save(&self, images: &[String], dest: &Path) -> BuilderResult<()>;

    /// 返回导入的镜像名称
    async fn load(&self, archive: &Path) -> BuilderResult<Vec<String>>;

    /// 运行容器直至退出，非零退出码返回 `BuildFailed`
    async fn run(&self, options: &RunOptions) -> BuilderResult<CommandOutput>;
}
