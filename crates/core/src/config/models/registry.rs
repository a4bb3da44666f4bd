use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::same_registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

/// 平台内部镜像仓库及第三方仓库凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 内部镜像仓库域名
    pub domain: String,
    pub user: String,
    pub pass: String,
    /// 按仓库域名索引的凭据，初始化后只读
    pub image_credentials: HashMap<String, RegistryCredential>,
    pub request_timeout_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: "hub.kato.me".to_string(),
            user: String::new(),
            pass: String::new(),
            image_credentials: HashMap::new(),
            request_timeout_seconds: 30,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.domain.is_empty() {
            return Err(anyhow::anyhow!("镜像仓库域名不能为空"));
        }
        if self.domain.contains('/') {
            return Err(anyhow::anyhow!("镜像仓库域名不能包含路径: {}", self.domain));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("镜像仓库请求超时时间必须大于0"));
        }
        Ok(())
    }

    /// 内部仓库凭据，未配置用户名时返回 None
    pub fn local_credential(&self) -> Option<RegistryCredential> {
        if self.user.is_empty() {
            return None;
        }
        Some(RegistryCredential {
            username: self.user.clone(),
            password: self.pass.clone(),
        })
    }

    /// 按域名查找凭据，Docker Hub 的别名视为同一域名
    pub fn credential_for(&self, domain: &str) -> Option<&RegistryCredential> {
        self.image_credentials
            .iter()
            .find(|(key, _)| same_registry(key, domain))
            .map(|(_, credential)| credential)
    }

    /// 内部仓库中组件镜像的名称
    pub fn component_image(&self, component_id: &str, deploy_version: &str) -> String {
        format!("{}/{}:{}", self.domain, component_id, deploy_version).to_lowercase()
    }
}
