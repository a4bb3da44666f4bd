//! 仓库构建信息
//!
//! 本地代码目录为 `<source_dir>/build/<tenant_id>/sha1(url + branch + component_id)`，
//! 构建子路径（`repo_url?dir=<path>`）必须位于该目录之内。

use std::fmt;
use std::path::{Component, Path, PathBuf};

use builder_core::{BuilderError, BuilderResult};
use sha1::{Digest, Sha1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoProtocol {
    Ssh,
    Http,
    Https,
    Svn,
    Oss,
}

impl RepoProtocol {
    /// 根据服务类型与地址判断获取方式
    pub fn detect(repository_url: &str, server_type: &str) -> BuilderResult<Self> {
        match server_type.to_ascii_lowercase().as_str() {
            "svn" => return Ok(RepoProtocol::Svn),
            "oss" => return Ok(RepoProtocol::Oss),
            _ => {}
        }

        let url = repository_url.trim();
        if url.starts_with("https://") {
            Ok(RepoProtocol::Https)
        } else if url.starts_with("http://") {
            Ok(RepoProtocol::Http)
        } else if url.starts_with("ssh://") || url.starts_with("git@") || is_scp_like(url) {
            Ok(RepoProtocol::Ssh)
        } else if url.starts_with("svn://") {
            Ok(RepoProtocol::Svn)
        } else {
            Err(BuilderError::invalid_params(format!(
                "无法识别的仓库地址: {url}"
            )))
        }
    }

    pub fn is_git(&self) -> bool {
        matches!(
            self,
            RepoProtocol::Ssh | RepoProtocol::Http | RepoProtocol::Https
        )
    }
}

impl fmt::Display for RepoProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoProtocol::Ssh => "ssh",
            RepoProtocol::Http => "http",
            RepoProtocol::Https => "https",
            RepoProtocol::Svn => "svn",
            RepoProtocol::Oss => "oss",
        };
        f.write_str(name)
    }
}

/// `user@host:path` 形式的 ssh 地址
fn is_scp_like(url: &str) -> bool {
    match (url.find('@'), url.find(':')) {
        (Some(at), Some(colon)) => at < colon && !url.contains("://"),
        _ => false,
    }
}

/// 构建所需的仓库信息，由任务参数推导，不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoBuildInfo {
    pub repository_url: String,
    pub protocol: RepoProtocol,
    pub branch: String,
    pub build_subpath: String,
    pub code_home: PathBuf,
    pub tenant_id: String,
    pub component_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl RepoBuildInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_root: &Path,
        raw_url: &str,
        branch: &str,
        server_type: &str,
        tenant_id: &str,
        component_id: &str,
        user: Option<String>,
        password: Option<String>,
    ) -> BuilderResult<Self> {
        let (repository_url, build_subpath) = split_subpath(raw_url);
        if repository_url.is_empty() {
            return Err(BuilderError::invalid_params("仓库地址不能为空"));
        }
        let protocol = RepoProtocol::detect(&repository_url, server_type)?;

        let branch = match (branch.trim(), protocol) {
            ("", RepoProtocol::Svn) => "trunk".to_string(),
            ("", _) => "master".to_string(),
            (branch, _) => branch.to_string(),
        };

        normalize_subpath(&build_subpath)?;

        let code_home = source_root
            .join("build")
            .join(tenant_id)
            .join(code_home_digest(&repository_url, &branch, component_id));

        Ok(Self {
            repository_url,
            protocol,
            branch,
            build_subpath,
            code_home,
            tenant_id: tenant_id.to_string(),
            component_id: component_id.to_string(),
            user: user.filter(|u| !u.is_empty()),
            password: password.filter(|p| !p.is_empty()),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.user.is_some()
    }

    /// 实际检出代码所在目录
    ///
    /// `trunk` 分支优先使用 `<home>/trunk`，`tag:<name>` 使用 `<home>/tags/<name>`（忽略大小写），
    /// 目录不存在时使用 `<home>`
    pub fn working_dir(&self) -> PathBuf {
        if self.branch == "trunk" {
            let trunk = self.code_home.join("trunk");
            if trunk.is_dir() {
                return trunk;
            }
        }
        if let Some(tag) = self.branch.strip_prefix("tag:") {
            if let Some(dir) = find_dir_ignore_case(&self.code_home.join("tags"), tag) {
                return dir;
            }
        }
        self.code_home.clone()
    }

    /// 构建目录：工作目录加构建子路径
    pub fn build_path(&self) -> BuilderResult<PathBuf> {
        let relative = normalize_subpath(&self.build_subpath)?;
        Ok(self.working_dir().join(relative))
    }
}

fn code_home_digest(url: &str, branch: &str, component_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    hasher.update(branch.as_bytes());
    hasher.update(component_id.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// 拆出 `?dir=` 参数
fn split_subpath(raw_url: &str) -> (String, String) {
    let raw_url = raw_url.trim();
    match raw_url.split_once('?') {
        Some((base, query)) => {
            let dir = url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "dir")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            (base.to_string(), dir)
        }
        None => (raw_url.to_string(), String::new()),
    }
}

/// 规范化构建子路径，拒绝绝对路径和逃逸出代码目录的路径
fn normalize_subpath(subpath: &str) -> BuilderResult<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(subpath.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(BuilderError::invalid_params(format!(
                        "构建子路径不能超出代码目录: {subpath}"
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(BuilderError::invalid_params(format!(
                    "无效的构建子路径: {subpath}"
                )))
            }
        }
    }
    Ok(normalized)
}

fn find_dir_ignore_case(parent: &Path, name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(parent).ok()?;
    entries
        .filter_map(Result::ok)
        .find(|entry| {
            entry.path().is_dir() && entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
        })
        .map(|entry| entry.path())
}
