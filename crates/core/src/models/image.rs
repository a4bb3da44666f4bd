//! 镜像名称解析
//!
//! 解析规则与 docker 的镜像引用规范一致：
//! - 第一段包含 `.`、`:` 或等于 `localhost` 时视为仓库域名，否则域名为 `docker.io`
//! - Docker Hub 上的单段名称补全为 `library/<name>`
//! - 未指定标签且没有摘要时标签为 `latest`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{BuilderError, BuilderResult};

pub const DEFAULT_DOMAIN: &str = "docker.io";
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const LEGACY_DEFAULT_DOMAIN: &str = "index.docker.io";
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub domain: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> BuilderResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BuilderError::invalid_params("镜像名称不能为空"));
        }

        let (name_part, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(BuilderError::invalid_params(format!(
                        "无效的镜像摘要: {input}"
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let last_slash = name_part.rfind('/');
        let (name, tag) = match name_part.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                (&name_part[..colon], Some(&name_part[colon + 1..]))
            }
            _ => (name_part, None),
        };

        let (domain, mut repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_DOMAIN.to_string(), name.to_string()),
        };

        let domain = if domain == LEGACY_DEFAULT_DOMAIN || domain == DOCKER_HUB_API_HOST {
            DEFAULT_DOMAIN.to_string()
        } else {
            domain
        };

        if domain == DEFAULT_DOMAIN && !repository.contains('/') {
            repository = format!("library/{repository}");
        }

        if repository.is_empty() || repository.split('/').any(|segment| segment.is_empty()) {
            return Err(BuilderError::invalid_params(format!(
                "无效的镜像名称: {input}"
            )));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(BuilderError::invalid_params(format!(
                "镜像名称必须为小写: {input}"
            )));
        }

        let tag = match tag {
            Some("") => {
                return Err(BuilderError::invalid_params(format!(
                    "无效的镜像标签: {input}"
                )))
            }
            Some(tag) => tag.to_string(),
            None if digest.is_some() => String::new(),
            None => DEFAULT_TAG.to_string(),
        };

        Ok(Self {
            domain,
            repository,
            tag,
            digest,
        })
    }

    /// 不含标签的完整名称 `<domain>/<repository>`
    pub fn name(&self) -> String {
        format!("{}/{}", self.domain, self.repository)
    }

    /// 仓库路径的最后一段
    pub fn simple_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(self.repository.as_str())
    }

    /// 调用 Registry API 时使用的主机
    pub fn api_host(&self) -> &str {
        if self.domain == DEFAULT_DOMAIN {
            DOCKER_HUB_API_HOST
        } else {
            &self.domain
        }
    }

    /// 摘要优先，否则使用标签
    pub fn reference(&self) -> &str {
        self.digest.as_deref().unwrap_or(&self.tag)
    }

    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            domain: self.domain.clone(),
            repository: self.repository.clone(),
            tag: tag.into(),
            digest: None,
        }
    }

    pub fn is_docker_hub(&self) -> bool {
        self.domain == DEFAULT_DOMAIN
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.repository)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageRef::parse(s)
    }
}

/// 判断两个域名是否指向同一镜像仓库（处理 Docker Hub 的别名）
pub fn same_registry(left: &str, right: &str) -> bool {
    fn normalize(domain: &str) -> &str {
        match domain {
            LEGACY_DEFAULT_DOMAIN | DOCKER_HUB_API_HOST => DEFAULT_DOMAIN,
            other => other,
        }
    }
    normalize(left).eq_ignore_ascii_case(normalize(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_private_registry_with_port() {
        let image = ImageRef::parse("192.168.0.1:9090/org/name:v1").unwrap();
        assert_eq!(image.domain, "192.168.0.1:9090");
        assert_eq!(image.repository, "org/name");
        assert_eq!(image.tag, "v1");
        assert_eq!(image.simple_name(), "name");
    }

    #[test]
    fn test_parse_short_name() {
        let image = ImageRef::parse("nginx").unwrap();
        assert_eq!(image.domain, "docker.io");
        assert_eq!(image.repository, "library/nginx");
        assert_eq!(image.tag, "latest");
        assert_eq!(image.simple_name(), "nginx");
        assert_eq!(image.api_host(), "registry-1.docker.io");
    }

    #[test]
    fn test_parse_with_digest() {
        let digest = "sha256:0123456789abcdef";
        let image = ImageRef::parse(&format!("localhost:5000/app@{digest}")).unwrap();
        assert_eq!(image.domain, "localhost:5000");
        assert_eq!(image.tag, "");
        assert_eq!(image.reference(), digest);
    }

    #[test]
    fn test_canonical_form_is_stable() {
        for input in [
            "nginx",
            "nginx:1.25",
            "library/redis",
            "192.168.0.1:9090/org/name:v1",
            "index.docker.io/library/busybox",
            "hub.kato.me/s:20230101120000",
            "localhost/app@sha256:abc",
            "quay.io/org/team/app:v2@sha256:abc",
        ] {
            let first = ImageRef::parse(input).unwrap();
            let second = ImageRef::parse(&first.to_string()).unwrap();
            assert_eq!(first, second, "input {input}");
            assert_eq!(first.to_string(), second.to_string());
        }
    }

    #[test]
    fn test_reject_invalid() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("Org/App").is_err());
        assert!(ImageRef::parse("app:").is_err());
        assert!(ImageRef::parse("hub.kato.me//app").is_err());
    }

    #[test]
    fn test_same_registry_aliases() {
        assert!(same_registry("docker.io", "registry-1.docker.io"));
        assert!(same_registry("index.docker.io", "docker.io"));
        assert!(!same_registry("docker.io", "quay.io"));
    }
}
