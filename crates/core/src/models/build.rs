use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::language::Language;
use super::version::DeliveredType;
use crate::traits::BuildLogger;

/// 构建产物类型，与版本记录的交付类型一致
pub type MediumType = DeliveredType;

/// 代码提交信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub message: String,
}

/// 额外的 hosts 记录，构建时转换为 `--add-host`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAlias {
    pub ip: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
}

impl HostAlias {
    pub fn to_add_host_args(&self) -> Vec<String> {
        self.hostnames
            .iter()
            .map(|host| format!("{host}:{}", self.ip))
            .collect()
    }
}

/// 由任务执行引擎传给构建策略的请求
#[derive(Clone)]
pub struct BuildRequest {
    pub repo_url: String,
    pub branch: String,
    /// 实际构建目录（工作树加子路径）
    pub source_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub tgz_dir: PathBuf,
    pub tenant_id: String,
    pub component_id: String,
    pub service_alias: String,
    pub deploy_version: String,
    pub event_id: String,
    pub runtime: String,
    pub lang: Language,
    pub build_envs: HashMap<String, String>,
    pub commit: CommitInfo,
    pub host_aliases: Vec<HostAlias>,
    pub logger: Arc<dyn BuildLogger>,
}

impl fmt::Debug for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildRequest")
            .field("repo_url", &self.repo_url)
            .field("branch", &self.branch)
            .field("source_dir", &self.source_dir)
            .field("component_id", &self.component_id)
            .field("deploy_version", &self.deploy_version)
            .field("lang", &self.lang)
            .finish_non_exhaustive()
    }
}

impl BuildRequest {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.build_envs.get(key).map(String::as_str)
    }

    /// `NO_CACHE` 出现在环境变量表或进程环境中时禁用构建缓存
    pub fn no_cache(&self) -> bool {
        self.build_envs.contains_key("NO_CACHE") || std::env::var_os("NO_CACHE").is_some()
    }
}

/// 构建结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub medium_type: MediumType,
    pub medium_path: String,
}

impl BuildResponse {
    pub fn image(path: impl Into<String>) -> Self {
        Self {
            medium_type: MediumType::Image,
            medium_path: path.into(),
        }
    }

    pub fn slug(path: impl Into<String>) -> Self {
        Self {
            medium_type: MediumType::Slug,
            medium_path: path.into(),
        }
    }
}
