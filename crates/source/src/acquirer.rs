//! 源码获取入口：按仓库协议选择 git、svn 或对象存储

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::SourceConfig;
use builder_core::{BuildLogger, BuilderResult, CommandRunner, CommitInfo, LogStatus};
use tracing::warn;

use crate::git::GitSource;
use crate::oss::OssSource;
use crate::repo_info::{RepoBuildInfo, RepoProtocol};
use crate::svn::{is_svn_checkout, SvnSource};

/// 本地工作树，离开作用域时删除目录，除非调用方调用了 [`WorkTree::keep`]
#[derive(Debug)]
pub struct WorkTree {
    path: PathBuf,
    keep: bool,
}

impl WorkTree {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 保留目录供下次增量更新
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for WorkTree {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "清理工作目录失败");
        }
    }
}

#[async_trait]
pub trait SourceAcquirer: Send + Sync {
    /// 把代码取到 `info.code_home`，返回工作树与最近一次提交
    async fn acquire(
        &self,
        info: &RepoBuildInfo,
        logger: &dyn BuildLogger,
    ) -> BuilderResult<(WorkTree, CommitInfo)>;
}

#[derive(Clone)]
pub struct DefaultSourceAcquirer {
    git: GitSource,
    svn: SvnSource,
    oss: OssSource,
}

impl DefaultSourceAcquirer {
    pub fn new(git: GitSource, svn: SvnSource, oss: OssSource) -> Self {
        Self { git, svn, oss }
    }

    pub fn from_config(
        config: &SourceConfig,
        runner: Arc<dyn CommandRunner>,
        http: reqwest::Client,
    ) -> Self {
        let timeout = Duration::from_secs(config.clone_timeout_seconds);
        Self {
            git: GitSource::new(
                runner.clone(),
                config.ssh_dir(),
                config.github_proxy.clone(),
                timeout,
            ),
            svn: SvnSource::new(runner, timeout),
            oss: OssSource::new(http, timeout),
        }
    }

    async fn fetch(&self, info: &RepoBuildInfo, logger: &dyn BuildLogger) -> BuilderResult<CommitInfo> {
        match info.protocol {
            RepoProtocol::Oss => self.oss.fetch(info).await,
            RepoProtocol::Svn => {
                if is_svn_checkout(&info.code_home) {
                    match self.svn.update(info).await {
                        Ok(commit) => return Ok(commit),
                        Err(e) => {
                            logger
                                .info(
                                    &format!("更新代码失败，重新检出: {}", e.user_message()),
                                    "code_version",
                                    LogStatus::None,
                                )
                                .await;
                        }
                    }
                }
                self.svn.checkout(info).await
            }
            _ => {
                if info.code_home.join(".git").is_dir() {
                    match self.git.update(info).await {
                        Ok(commit) => return Ok(commit),
                        Err(e) => {
                            logger
                                .info(
                                    &format!("拉取代码失败，重新克隆: {}", e.user_message()),
                                    "code_version",
                                    LogStatus::None,
                                )
                                .await;
                        }
                    }
                }
                self.git.clone(info).await
            }
        }
    }
}

#[async_trait]
impl SourceAcquirer for DefaultSourceAcquirer {
    async fn acquire(
        &self,
        info: &RepoBuildInfo,
        logger: &dyn BuildLogger,
    ) -> BuilderResult<(WorkTree, CommitInfo)> {
        logger
            .info(
                &format!("开始获取代码 {} ({})", info.repository_url, info.branch),
                "code_version",
                LogStatus::Starting,
            )
            .await;

        let result = self.fetch(info, logger).await;
        let tree = WorkTree::new(info.code_home.clone());
        match result {
            Ok(commit) => {
                let message = if commit.hash.is_empty() {
                    "代码获取完成".to_string()
                } else {
                    format!("代码获取完成，提交 {} {}", commit.hash, commit.message)
                };
                logger.info(&message, "code_version", LogStatus::Success).await;
                Ok((tree, commit))
            }
            Err(e) => {
                logger
                    .error("代码获取失败", "code_version", LogStatus::Failure)
                    .await;
                Err(e)
            }
        }
    }
}
