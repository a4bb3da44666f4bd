use serde::{Deserialize, Serialize};

/// 键值存储（Redis）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStoreConfig {
    pub url: String,
    /// 键前缀中的产品名，例如 `/kato/shareresult/<id>`
    pub product: String,
    pub connection_timeout_seconds: u64,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            product: crate::PRODUCT_NAME.to_string(),
            connection_timeout_seconds: 10,
        }
    }
}

impl KvStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("键值存储URL不能为空"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!("键值存储URL必须是Redis格式"));
        }
        if self.product.is_empty() || self.product.contains('/') {
            return Err(anyhow::anyhow!("产品名称不能为空且不能包含 '/'"));
        }
        Ok(())
    }
}
