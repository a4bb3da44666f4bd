//! 通过 svn 命令行获取代码

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use builder_core::errors::{AuthFailure, MissingSource};
use builder_core::{BuilderError, BuilderResult, CommandRunner, CommandSpec, CommitInfo};
use tracing::{info, warn};

use crate::repo_info::RepoBuildInfo;

/// 路径不存在
const PATH_NOT_FOUND: &str = "E170000";

#[derive(Clone)]
pub struct SvnSource {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl SvnSource {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// 检出代码；`trunk` 不存在时改为检出仓库根路径
    pub async fn checkout(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        if info.code_home.exists() {
            tokio::fs::remove_dir_all(&info.code_home).await?;
        }
        if let Some(parent) = info.code_home.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = checkout_url(&info.repository_url, &info.branch);
        info!(url = %url, "开始检出 svn 代码");
        let output = self.run_checkout(info, &url).await?;
        if !output.is_success() {
            let text = output.combined();
            if text.contains(PATH_NOT_FOUND) && info.branch == "trunk" {
                let fallback = url.trim_end_matches("/trunk").to_string();
                warn!(url = %url, fallback = %fallback, "trunk 路径不存在，改为检出仓库根路径");
                if info.code_home.exists() {
                    tokio::fs::remove_dir_all(&info.code_home).await?;
                }
                let retry = self.run_checkout(info, &fallback).await?;
                if !retry.is_success() {
                    return Err(classify_svn_error(&retry.combined(), info));
                }
            } else {
                return Err(classify_svn_error(&text, info));
            }
        }

        self.last_commit(info).await
    }

    pub async fn update(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        let spec = self
            .command(info)
            .arg("update")
            .arg(info.code_home.to_string_lossy().to_string());
        let output = self.run(&spec, info).await?;
        if !output.is_success() {
            return Err(classify_svn_error(&output.combined(), info));
        }
        self.last_commit(info).await
    }

    /// 由 `svn log --xml -l 1` 得到最近一次提交
    pub async fn last_commit(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        let spec = self
            .command(info)
            .args(["log", "--xml", "-l", "1"])
            .arg(info.code_home.to_string_lossy().to_string());
        let output = self.run(&spec, info).await?;
        if !output.is_success() {
            return Err(classify_svn_error(&output.combined(), info));
        }
        parse_svn_log(&output.stdout)
    }

    async fn run_checkout(
        &self,
        info: &RepoBuildInfo,
        url: &str,
    ) -> BuilderResult<builder_core::CommandOutput> {
        let spec = self
            .command(info)
            .arg("checkout")
            .arg(url)
            .arg(info.code_home.to_string_lossy().to_string());
        self.run(&spec, info).await
    }

    async fn run(
        &self,
        spec: &CommandSpec,
        info: &RepoBuildInfo,
    ) -> BuilderResult<builder_core::CommandOutput> {
        self.runner.run(spec).await.map_err(|err| match err {
            BuilderError::OperationTimeout(_) => {
                BuilderError::SourceTimeout(info.repository_url.clone())
            }
            other => other,
        })
    }

    fn command(&self, info: &RepoBuildInfo) -> CommandSpec {
        let mut spec = CommandSpec::new("svn")
            .args(["--non-interactive", "--trust-server-cert", "--no-auth-cache"])
            .timeout(self.timeout);
        if let Some(user) = &info.user {
            spec = spec.arg("--username").arg(user.as_str());
            if let Some(password) = &info.password {
                spec = spec.arg("--password").arg(password.as_str());
            }
        }
        spec
    }
}

/// 分支改写：`trunk` → `<url>/trunk`，`tag:<name>` → `<url>/tags/<name>`，
/// 其他 → `<url>/branches/<name>`
pub fn checkout_url(repository_url: &str, branch: &str) -> String {
    let base = repository_url.trim_end_matches('/');
    match branch {
        "" | "trunk" => {
            if base.ends_with("/trunk") {
                base.to_string()
            } else {
                format!("{base}/trunk")
            }
        }
        branch => match branch.strip_prefix("tag:") {
            Some(tag) => format!("{base}/tags/{tag}"),
            None => format!("{base}/branches/{branch}"),
        },
    }
}

pub fn parse_svn_log(xml: &str) -> BuilderResult<CommitInfo> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| BuilderError::internal(format!("解析 svn log 输出失败: {e}")))?;
    let Some(entry) = doc
        .descendants()
        .find(|node| node.has_tag_name("logentry"))
    else {
        return Ok(CommitInfo::default());
    };

    let child_text = |name: &str| {
        entry
            .children()
            .find(|node| node.has_tag_name(name))
            .and_then(|node| node.text())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    Ok(CommitInfo {
        hash: entry.attribute("revision").unwrap_or_default().to_string(),
        author: child_text("author"),
        message: child_text("msg"),
    })
}

pub fn classify_svn_error(output: &str, info: &RepoBuildInfo) -> BuilderError {
    let repo = info.repository_url.clone();
    let lower = output.to_lowercase();

    if output.contains("E170001")
        || output.contains("E215004")
        || lower.contains("authorization failed")
    {
        if info.has_credentials() {
            return BuilderError::SourceAuthFailed {
                repo,
                reason: AuthFailure::Credentials,
            };
        }
        return BuilderError::SourceAuthRequired(repo);
    }
    if output.contains(PATH_NOT_FOUND) || output.contains("E160013") {
        if info.branch == "trunk" {
            return BuilderError::SourceNotFound(MissingSource::Repository(repo));
        }
        return BuilderError::SourceNotFound(MissingSource::Branch(info.branch.clone()));
    }
    if output.contains("E175002")
        || output.contains("E670002")
        || output.contains("E000110")
        || lower.contains("timed out")
    {
        return BuilderError::SourceTimeout(repo);
    }
    BuilderError::internal(format!("svn 执行失败: {}", output.trim()))
}

/// 工作树是否为 svn 检出
pub fn is_svn_checkout(dir: &Path) -> bool {
    dir.join(".svn").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_url() {
        let base = "http://svn.example/repo";
        assert_eq!(checkout_url(base, "trunk"), format!("{base}/trunk"));
        assert_eq!(checkout_url(&format!("{base}/trunk"), "trunk"), format!("{base}/trunk"));
        assert_eq!(checkout_url(&format!("{base}/"), "tag:v1"), format!("{base}/tags/v1"));
        assert_eq!(checkout_url(base, "dev"), format!("{base}/branches/dev"));
    }

    #[test]
    fn test_parse_svn_log() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<log>
<logentry revision="42">
<author>bob</author>
<date>2023-01-01T12:00:00.000000Z</date>
<msg>initial import</msg>
</logentry>
</log>"#;
        let commit = parse_svn_log(xml).unwrap();
        assert_eq!(commit.hash, "42");
        assert_eq!(commit.author, "bob");
        assert_eq!(commit.message, "initial import");
    }

    #[test]
    fn test_parse_empty_log() {
        let commit = parse_svn_log("<?xml version=\"1.0\"?><log></log>").unwrap();
        assert_eq!(commit, CommitInfo::default());
    }
}
