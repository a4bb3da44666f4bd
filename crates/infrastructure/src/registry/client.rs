use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::{RegistryConfig, RegistryCredential};
use builder_core::models::{same_registry, ImageRef};
use builder_core::{BuilderError, BuilderResult, RegistryApi};
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::auth::{basic_header, fetch_token, Challenge};
use super::transport::HostResolver;
use super::network_error;

pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry V2 客户端
///
/// 凭据按以下顺序选取：调用方显式传入、内部仓库凭据（仅内部仓库域名）、按域名配置的凭据。
pub struct RegistryClient {
    config: RegistryConfig,
    resolver: Arc<HostResolver>,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig, resolver: Arc<HostResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn from_config(config: &RegistryConfig) -> BuilderResult<Self> {
        let resolver = HostResolver::new(std::time::Duration::from_secs(
            config.request_timeout_seconds,
        ))?;
        Ok(Self::new(config.clone(), Arc::new(resolver)))
    }

    pub fn resolver(&self) -> Arc<HostResolver> {
        self.resolver.clone()
    }

    fn credential_for(
        &self,
        domain: &str,
        explicit: Option<&RegistryCredential>,
    ) -> Option<RegistryCredential> {
        if let Some(credential) = explicit {
            return Some(credential.clone());
        }
        if same_registry(domain, &self.config.domain) {
            if let Some(local) = self.config.local_credential() {
                return Some(local);
            }
        }
        self.config.credential_for(domain).cloned()
    }

    /// 发送请求，收到 401 时按质询获取令牌或使用 Basic 认证重试一次
    async fn send(
        &self,
        host: &str,
        method: Method,
        path: &str,
        scope: &str,
        credential: Option<&RegistryCredential>,
    ) -> BuilderResult<Response> {
        let transport = self.resolver.resolve(host).await?;
        let client = self.resolver.client(transport);
        let url = format!("{}://{host}{path}", transport.scheme());
        let request = |authorization: Option<&str>| {
            let mut builder = client.request(method.clone(), &url).header(
                ACCEPT,
                [MANIFEST_V2, MANIFEST_LIST_V2, OCI_MANIFEST, OCI_INDEX].join(", "),
            );
            if let Some(authorization) = authorization {
                builder = builder.header(AUTHORIZATION, authorization);
            }
            builder
        };

        let response = match request(None).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() {
                    self.resolver.forget(host).await;
                }
                return Err(network_error(e));
            }
        };
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse);
        let authorization = match challenge {
            Some(Challenge::Bearer { realm, service, .. }) => {
                let token =
                    fetch_token(client, &realm, service.as_deref(), scope, credential).await?;
                format!("Bearer {token}")
            }
            _ => match credential {
                Some(credential) => basic_header(credential),
                None => return Ok(response),
            },
        };
        debug!(host, path, "使用认证信息重试请求");
        request(Some(&authorization))
            .send()
            .await
            .map_err(network_error)
    }

    async fn send_local(
        &self,
        method: Method,
        path: &str,
        scope: &str,
    ) -> BuilderResult<Response> {
        let credential = self.credential_for(&self.config.domain, None);
        self.send(&self.config.domain, method, path, scope, credential.as_ref())
            .await
    }
}

fn pull_scope(repository: &str) -> String {
    format!("repository:{repository}:pull")
}

/// 从 `Link: </v2/x/tags/list?n=100&last=b>; rel="next"` 中取出下一页路径
fn next_page(response: &Response) -> Option<String> {
    let link = response.headers().get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let part = part.trim();
        if !part.contains("rel=\"next\"") {
            return None;
        }
        let start = part.find('<')? + 1;
        let end = part.find('>')?;
        let target = &part[start..end];
        match url::Url::parse(target) {
            Ok(url) => Some(match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            }),
            Err(_) => Some(target.to_string()),
        }
    })
}

fn unexpected(action: &str, status: StatusCode) -> BuilderError {
    BuilderError::Registry(format!("{action}失败，镜像仓库返回 {status}"))
}

#[async_trait]
impl RegistryApi for RegistryClient {
    #[instrument(skip(self, credential), fields(image = %image))]
    async fn exists(
        &self,
        image: &ImageRef,
        credential: Option<&RegistryCredential>,
    ) -> BuilderResult<bool> {
        let credential = self.credential_for(&image.domain, credential);
        let path = format!("/v2/{}/manifests/{}", image.repository, image.reference());
        let response = self
            .send(
                image.api_host(),
                Method::HEAD,
                &path,
                &pull_scope(&image.repository),
                credential.as_ref(),
            )
            .await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(BuilderError::ImageAuthRequired(image.to_string()))
            }
            status => Err(unexpected("查询镜像", status)),
        }
    }

    #[instrument(skip(self))]
    async fn tags(&self, repository: &str) -> BuilderResult<Vec<String>> {
        let scope = pull_scope(repository);
        let mut path = format!("/v2/{repository}/tags/list");
        let mut tags = Vec::new();
        loop {
            let response = self.send_local(Method::GET, &path, &scope).await?;
            match response.status() {
                status if status.is_success() => {}
                // 仓库不存在时没有标签
                StatusCode::NOT_FOUND => return Ok(tags),
                status => return Err(unexpected("查询镜像标签", status)),
            }
            let next = next_page(&response);
            let page: TagList = response.json().await.map_err(network_error)?;
            tags.extend(page.tags.unwrap_or_default());
            match next {
                Some(next) => path = next,
                None => return Ok(tags),
            }
        }
    }

    #[instrument(skip(self))]
    async fn manifest_digest_v2(&self, repository: &str, tag: &str) -> BuilderResult<String> {
        let path = format!("/v2/{repository}/manifests/{tag}");
        let response = self
            .send_local(Method::HEAD, &path, &pull_scope(repository))
            .await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(BuilderError::ImageNotFound(format!("{repository}:{tag}")))
            }
            status => return Err(unexpected("查询镜像摘要", status)),
        }
        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                BuilderError::Registry(format!("镜像 {repository}:{tag} 的响应缺少摘要"))
            })
    }

    #[instrument(skip(self))]
    async fn delete_manifest(&self, repository: &str, digest: &str) -> BuilderResult<()> {
        let path = format!("/v2/{repository}/manifests/{digest}");
        let scope = format!("repository:{repository}:delete");
        let response = self.send_local(Method::DELETE, &path, &scope).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::METHOD_NOT_ALLOWED {
            return Err(BuilderError::RegistryWriteDisabled);
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("UNSUPPORTED") {
            return Err(BuilderError::RegistryWriteDisabled);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(BuilderError::ImageNotFound(format!("{repository}@{digest}")));
        }
        warn!(repository, digest, %status, body, "删除镜像清单失败");
        Err(unexpected("删除镜像清单", status))
    }
}
