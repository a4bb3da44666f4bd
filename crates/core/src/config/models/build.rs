use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 构建策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub build_timeout_seconds: u64,
    pub push_timeout_seconds: u64,
    pub pull_timeout_seconds: u64,
    /// 重新打标签后删除拉取的源镜像
    pub disable_image_cache: bool,
    /// 执行 buildpack 生成 slug 的构建镜像
    pub builder_image: String,
    /// 运行 slug 的基础镜像
    pub runner_image: String,
    /// 容器运行时命令
    pub docker_bin: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            build_timeout_seconds: 60 * 60,
            push_timeout_seconds: 20 * 60,
            pull_timeout_seconds: 10 * 60,
            disable_image_cache: false,
            builder_image: "hub.kato.me/builder:latest".to_string(),
            runner_image: "hub.kato.me/runner:latest".to_string(),
            docker_bin: "docker".to_string(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.build_timeout_seconds == 0
            || self.push_timeout_seconds == 0
            || self.pull_timeout_seconds == 0
        {
            return Err(anyhow::anyhow!("构建、推送和拉取超时时间都必须大于0"));
        }
        if self.builder_image.is_empty() || self.runner_image.is_empty() {
            return Err(anyhow::anyhow!("构建镜像和运行镜像不能为空"));
        }
        if self.docker_bin.is_empty() {
            return Err(anyhow::anyhow!("容器运行时命令不能为空"));
        }
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_seconds)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_seconds)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_seconds)
    }
}
