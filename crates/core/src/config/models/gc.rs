use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 垃圾回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    pub enabled: bool,
    /// 镜像仓库清理周期
    pub interval_seconds: u64,
    /// 本地 slug 清理时每个组件保留的版本数
    pub retain_versions: usize,
    pub slug_sweep_interval_seconds: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 24 * 60 * 60,
            retain_versions: 5,
            slug_sweep_interval_seconds: 24 * 60 * 60,
        }
    }
}

impl GcConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 || self.slug_sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("垃圾回收周期必须大于0"));
        }
        if self.retain_versions == 0 {
            return Err(anyhow::anyhow!("保留版本数必须大于0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn slug_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.slug_sweep_interval_seconds)
    }
}
