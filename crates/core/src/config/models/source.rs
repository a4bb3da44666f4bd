use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 源码获取相关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// 代码检出根目录
    pub source_dir: PathBuf,
    /// 构建缓存根目录
    pub cache_dir: PathBuf,
    /// 共享存储根目录，slug 产物存放于此
    pub data_root: PathBuf,
    /// SSH 私钥所在目录，为空时使用 `$HOME/.ssh`
    pub ssh_dir: Option<PathBuf>,
    /// 仅对 github.com 生效的 HTTP 代理
    pub github_proxy: Option<String>,
    pub clone_timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("/grdata/source"),
            cache_dir: PathBuf::from("/cache"),
            data_root: PathBuf::from("/grdata"),
            ssh_dir: None,
            github_proxy: None,
            clone_timeout_seconds: 30 * 60,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.source_dir.is_absolute() {
            return Err(anyhow::anyhow!(
                "源码目录必须是绝对路径: {}",
                self.source_dir.display()
            ));
        }
        if !self.data_root.is_absolute() {
            return Err(anyhow::anyhow!(
                "数据目录必须是绝对路径: {}",
                self.data_root.display()
            ));
        }
        if let Some(proxy) = &self.github_proxy {
            if !proxy.is_empty() && url::Url::parse(proxy).is_err() {
                return Err(anyhow::anyhow!("GITHUB_PROXY 不是有效的URL: {proxy}"));
            }
        }
        if self.clone_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("源码获取超时时间必须大于0"));
        }
        Ok(())
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_seconds)
    }

    pub fn ssh_dir(&self) -> PathBuf {
        match &self.ssh_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/root"))
                .join(".ssh"),
        }
    }

    /// 构建缓存目录 `<cache>/build/<tenant>/cache/<component>`
    pub fn component_cache_dir(&self, tenant_id: &str, component_id: &str) -> PathBuf {
        self.cache_dir
            .join("build")
            .join(tenant_id)
            .join("cache")
            .join(component_id)
    }

    /// slug 输出目录 `<data_root>/build/tenant/<tenant>/slug`
    pub fn slug_dir(&self, tenant_id: &str) -> PathBuf {
        self.data_root
            .join("build")
            .join("tenant")
            .join(tenant_id)
            .join("slug")
    }
}
