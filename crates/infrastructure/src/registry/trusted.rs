use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::RegistryCredential;
use builder_core::{BuilderError, BuilderResult, TrustedRegistry};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, instrument};

use super::network_error;
use super::transport::HostResolver;

pub const SHORT_DESCRIPTION_LIMIT: usize = 140;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRepository<'a> {
    name: &'a str,
    short_description: String,
    long_description: &'a str,
    visibility: &'a str,
}

/// 可信仓库的 `/api/v0/repositories` 接口
pub struct TrustedRegistryClient {
    resolver: Arc<HostResolver>,
}

impl TrustedRegistryClient {
    pub fn new(resolver: Arc<HostResolver>) -> Self {
        Self { resolver }
    }

    async fn base_url(&self, domain: &str) -> BuilderResult<(String, &reqwest::Client)> {
        let transport = self.resolver.resolve(domain).await?;
        Ok((
            format!("{}://{domain}/api/v0/repositories", transport.scheme()),
            self.resolver.client(transport),
        ))
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[async_trait]
impl TrustedRegistry for TrustedRegistryClient {
    #[instrument(skip(self, credential))]
    async fn repository_exists(
        &self,
        domain: &str,
        namespace: &str,
        name: &str,
        credential: &RegistryCredential,
    ) -> BuilderResult<bool> {
        let (base, client) = self.base_url(domain).await?;
        let response = client
            .get(format!("{base}/{namespace}/{name}"))
            .basic_auth(&credential.username, Some(&credential.password))
            .send()
            .await
            .map_err(network_error)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                BuilderError::ImageAuthRequired(format!("{domain}/{namespace}/{name}")),
            ),
            status => Err(BuilderError::Registry(format!(
                "查询可信仓库 {namespace}/{name} 失败: {status}"
            ))),
        }
    }

    #[instrument(skip(self, short_description, credential))]
    async fn create_repository(
        &self,
        domain: &str,
        namespace: &str,
        name: &str,
        short_description: &str,
        credential: &RegistryCredential,
    ) -> BuilderResult<()> {
        let (base, client) = self.base_url(domain).await?;
        let body = CreateRepository {
            name,
            short_description: truncate_chars(short_description, SHORT_DESCRIPTION_LIMIT),
            long_description: short_description,
            visibility: "private",
        };
        let response = client
            .post(format!("{base}/{namespace}"))
            .basic_auth(&credential.username, Some(&credential.password))
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        match response.status() {
            status if status.is_success() => {
                info!("可信仓库 {}/{} 创建成功", namespace, name);
                Ok(())
            }
            // 仓库已存在
            StatusCode::BAD_REQUEST => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                BuilderError::ImageAuthRequired(format!("{domain}/{namespace}/{name}")),
            ),
            status => Err(BuilderError::Registry(format!(
                "创建可信仓库 {namespace}/{name} 失败: {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        let text = "镜".repeat(200);
        assert_eq!(truncate_chars(&text, SHORT_DESCRIPTION_LIMIT).chars().count(), 140);
        assert_eq!(truncate_chars("short", SHORT_DESCRIPTION_LIMIT), "short");
    }

    #[test]
    fn test_create_body_shape() {
        let body = CreateRepository {
            name: "app",
            short_description: "d".to_string(),
            long_description: "d",
            visibility: "private",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({
                "name": "app",
                "shortDescription": "d",
                "longDescription": "d",
                "visibility": "private"
            })
        );
    }
}
