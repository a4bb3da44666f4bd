//! 通过 git 命令行获取代码

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use builder_core::errors::{AuthFailure, MissingSource};
use builder_core::{
    BuilderError, BuilderResult, CommandOutput, CommandRunner, CommandSpec, CommitInfo,
};
use tracing::{debug, info};

use crate::repo_info::{RepoBuildInfo, RepoProtocol};

/// 共享的构建私钥文件名
pub const BUILDER_KEY: &str = "builder_rsa";
/// 默认用户私钥文件名
pub const DEFAULT_KEY: &str = "id_rsa";

#[derive(Clone)]
pub struct GitSource {
    runner: Arc<dyn CommandRunner>,
    ssh_dir: PathBuf,
    github_proxy: Option<String>,
    timeout: Duration,
}

impl GitSource {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ssh_dir: PathBuf,
        github_proxy: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            ssh_dir,
            github_proxy: github_proxy.filter(|p| !p.is_empty()),
            timeout,
        }
    }

    /// 单分支浅克隆到 `code_home`
    pub async fn clone(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        if info.code_home.exists() {
            tokio::fs::remove_dir_all(&info.code_home).await?;
        }
        if let Some(parent) = info.code_home.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let remote = self.remote_url(info)?;
        let home = info.code_home.to_string_lossy().to_string();
        let spec = self
            .base_command(info)
            .args(["clone", "--depth", "1", "--single-branch", "--branch"])
            .arg(info.branch.as_str())
            .arg(remote)
            .arg(home);

        info!(
            repo = %info.repository_url,
            branch = %info.branch,
            "开始克隆代码仓库"
        );
        let output = self.run(&spec, info).await?;
        if !output.is_success() {
            return Err(classify_git_error(&output.combined(), info));
        }

        self.head_commit(&info.code_home).await.map_err(|err| match err {
            BuilderError::BuildFailed(_) => BuilderError::SourceEmpty(info.repository_url.clone()),
            other => other,
        })
    }

    /// 在已有目录上拉取最新提交
    pub async fn update(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        let home = info.code_home.to_string_lossy().to_string();
        let fetch = self
            .base_command(info)
            .args(["-C", home.as_str(), "fetch", "--depth", "1"])
            .arg(self.remote_url(info)?)
            .arg(info.branch.as_str());
        let output = self.run(&fetch, info).await?;
        if !output.is_success() {
            return Err(classify_git_error(&output.combined(), info));
        }

        let reset = CommandSpec::new("git")
            .args(["-C", home.as_str(), "reset", "--hard", "FETCH_HEAD"])
            .timeout(self.timeout);
        let output = self.runner.run(&reset).await?;
        if !output.is_success() {
            return Err(BuilderError::internal(format!(
                "git reset 失败: {}",
                output.tail(5)
            )));
        }
        debug!(repo = %info.repository_url, "代码增量更新完成");
        self.head_commit(&info.code_home).await
    }

    /// 最近一次提交，仓库没有提交时返回 `BuildFailed`
    pub async fn head_commit(&self, dir: &Path) -> BuilderResult<CommitInfo> {
        let spec = CommandSpec::new("git")
            .arg("-C")
            .arg(dir.to_string_lossy().to_string())
            .args(["log", "-1", "--pretty=format:%H%n%an%n%s"])
            .timeout(Duration::from_secs(30));
        let output = self.runner.run(&spec).await?;
        if !output.is_success() {
            return Err(BuilderError::build_failed(format!(
                "读取提交信息失败: {}",
                output.tail(3)
            )));
        }
        Ok(parse_commit(&output.stdout))
    }

    async fn run(&self, spec: &CommandSpec, info: &RepoBuildInfo) -> BuilderResult<CommandOutput> {
        self.runner.run(spec).await.map_err(|err| match err {
            BuilderError::OperationTimeout(_) => {
                BuilderError::SourceTimeout(info.repository_url.clone())
            }
            other => other,
        })
    }

    fn base_command(&self, info: &RepoBuildInfo) -> CommandSpec {
        let mut spec = CommandSpec::new("git")
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout);

        if let Some(proxy) = &self.github_proxy {
            if is_github(&info.repository_url) {
                spec = spec.arg("-c").arg(format!("http.proxy={proxy}"));
            }
        }

        if info.protocol == RepoProtocol::Ssh {
            let mut ssh =
                String::from("ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null");
            if let Some(key) = self.find_ssh_key(&info.tenant_id) {
                ssh.push_str(&format!(" -i {}", key.display()));
            }
            spec = spec.env("GIT_SSH_COMMAND", ssh);
        }
        spec
    }

    /// 私钥查找顺序：租户私钥、共享构建私钥、默认用户私钥
    pub fn find_ssh_key(&self, tenant_id: &str) -> Option<PathBuf> {
        [tenant_id, BUILDER_KEY, DEFAULT_KEY]
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| self.ssh_dir.join(name))
            .find(|path| path.is_file())
    }

    /// http(s) 仓库带上用户名密码
    fn remote_url(&self, info: &RepoBuildInfo) -> BuilderResult<String> {
        let (Some(user), true) = (
            info.user.as_deref(),
            matches!(info.protocol, RepoProtocol::Http | RepoProtocol::Https),
        ) else {
            return Ok(info.repository_url.clone());
        };

        let mut url = url::Url::parse(&info.repository_url).map_err(|e| {
            BuilderError::invalid_params(format!("无效的仓库地址 {}: {e}", info.repository_url))
        })?;
        url.set_username(user)
            .map_err(|_| BuilderError::invalid_params("仓库地址不支持用户名"))?;
        url.set_password(info.password.as_deref())
            .map_err(|_| BuilderError::invalid_params("仓库地址不支持密码"))?;
        Ok(url.to_string())
    }
}

fn is_github(repository_url: &str) -> bool {
    match url::Url::parse(repository_url) {
        Ok(url) => url
            .host_str()
            .is_some_and(|host| host == "github.com" || host.ends_with(".github.com")),
        Err(_) => repository_url.contains("github.com"),
    }
}

fn parse_commit(stdout: &str) -> CommitInfo {
    let mut lines = stdout.lines();
    CommitInfo {
        hash: lines.next().unwrap_or_default().trim().to_string(),
        author: lines.next().unwrap_or_default().trim().to_string(),
        message: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
    }
}

/// 把 git 的错误输出映射为面向用户的错误类别
pub fn classify_git_error(output: &str, info: &RepoBuildInfo) -> BuilderError {
    let text = output.to_lowercase();
    let repo = info.repository_url.clone();

    if text.contains("empty repository") {
        return BuilderError::SourceEmpty(repo);
    }
    if text.contains("repository not found")
        || text.contains("does not appear to be a git repository")
    {
        return BuilderError::SourceNotFound(MissingSource::Repository(repo));
    }
    if text.contains("permission denied (publickey")
        || text.contains("host key verification failed")
        || (text.contains("could not read from remote repository")
            && info.protocol == RepoProtocol::Ssh)
    {
        return BuilderError::SourceAuthFailed {
            repo,
            reason: AuthFailure::SshKey,
        };
    }
    if text.contains("could not read username")
        || text.contains("terminal prompts disabled")
        || text.contains("authentication required")
    {
        if info.has_credentials() {
            return BuilderError::SourceAuthFailed {
                repo,
                reason: AuthFailure::Credentials,
            };
        }
        return BuilderError::SourceAuthRequired(repo);
    }
    if text.contains("authentication failed")
        || text.contains("invalid username or password")
        || text.contains("error: 403")
        || text.contains("returned error: 401")
    {
        return BuilderError::SourceAuthFailed {
            repo,
            reason: AuthFailure::Credentials,
        };
    }
    if (text.contains("remote branch") && text.contains("not found"))
        || text.contains("couldn't find remote ref")
    {
        return BuilderError::SourceNotFound(MissingSource::Branch(info.branch.clone()));
    }
    if text.contains("not found") {
        return BuilderError::SourceNotFound(MissingSource::Repository(repo));
    }
    if text.contains("timed out")
        || text.contains("could not resolve host")
        || text.contains("connection refused")
        || text.contains("early eof")
    {
        return BuilderError::SourceTimeout(repo);
    }

    let tail: Vec<&str> = output.lines().rev().take(5).collect();
    BuilderError::internal(format!(
        "git 执行失败: {}",
        tail.into_iter().rev().collect::<Vec<_>>().join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(url: &str, user: Option<&str>) -> RepoBuildInfo {
        RepoBuildInfo::new(
            Path::new("/tmp/src"),
            url,
            "dev",
            "git",
            "T",
            "S",
            user.map(str::to_string),
            user.map(|_| "p@ss".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn test_error_classification() {
        let https = info("https://git.example/foo.git", None);
        assert!(matches!(
            classify_git_error("fatal: could not read Username for 'https://git.example'", &https),
            BuilderError::SourceAuthRequired(_)
        ));
        assert!(matches!(
            classify_git_error("fatal: Remote branch dev not found in upstream origin", &https),
            BuilderError::SourceNotFound(MissingSource::Branch(ref b)) if b == "dev"
        ));
        assert!(matches!(
            classify_git_error("remote: Repository not found.", &https),
            BuilderError::SourceNotFound(MissingSource::Repository(_))
        ));
        assert!(matches!(
            classify_git_error("warning: You appear to have cloned an empty repository.", &https),
            BuilderError::SourceEmpty(_)
        ));
        assert!(matches!(
            classify_git_error("fatal: unable to access: Connection timed out", &https),
            BuilderError::SourceTimeout(_)
        ));

        let with_user = info("https://git.example/foo.git", Some("u"));
        assert!(matches!(
            classify_git_error("fatal: Authentication failed for 'https://git.example'", &with_user),
            BuilderError::SourceAuthFailed { reason: AuthFailure::Credentials, .. }
        ));

        let ssh = info("git@git.example:foo/bar.git", None);
        assert!(matches!(
            classify_git_error("git@git.example: Permission denied (publickey).", &ssh),
            BuilderError::SourceAuthFailed { reason: AuthFailure::SshKey, .. }
        ));
    }

    #[test]
    fn test_parse_commit() {
        let commit = parse_commit("abc123\nalice\nfix build\nsecond line");
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author, "alice");
        assert_eq!(commit.message, "fix build\nsecond line");
    }

    #[test]
    fn test_github_detection() {
        assert!(is_github("https://github.com/org/repo.git"));
        assert!(!is_github("https://gitlab.com/org/repo.git"));
        assert!(is_github("git@github.com:org/repo.git"));
    }
}
