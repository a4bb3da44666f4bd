//! `WWW-Authenticate` 质询解析与令牌获取

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use builder_core::config::RegistryCredential;
use builder_core::{BuilderError, BuilderResult};
use reqwest::StatusCode;
use serde::Deserialize;

use super::network_error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// 解析质询头，无法识别的方案返回 `None`
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut params = parse_params(rest);
        let realm = params.remove("realm")?;
        Some(Challenge::Bearer {
            realm,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// `key="value",key2=value2`，引号内可以有逗号
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    params
}

pub fn basic_header(credential: &RegistryCredential) -> String {
    let raw = format!("{}:{}", credential.username, credential.password);
    format!("Basic {}", STANDARD.encode(raw))
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

/// 向令牌服务申请访问令牌
pub async fn fetch_token(
    client: &reqwest::Client,
    realm: &str,
    service: Option<&str>,
    scope: &str,
    credential: Option<&RegistryCredential>,
) -> BuilderResult<String> {
    let mut query = Vec::new();
    if let Some(service) = service {
        query.push(("service", service));
    }
    if !scope.is_empty() {
        query.push(("scope", scope));
    }
    let mut request = client.get(realm).query(&query);
    if let Some(credential) = credential {
        request = request.basic_auth(&credential.username, Some(&credential.password));
    }

    let response = request.send().await.map_err(network_error)?;
    match response.status() {
        status if status.is_success() => {}
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            return Err(BuilderError::ImageAuthRequired(realm.to_string()))
        }
        status => {
            return Err(BuilderError::Registry(format!(
                "获取访问令牌失败: {realm} 返回 {status}"
            )))
        }
    }

    let body: TokenResponse = response.json().await.map_err(network_error)?;
    let token = if body.token.is_empty() {
        body.access_token
    } else {
        body.token
    };
    if token.is_empty() {
        return Err(BuilderError::Registry("令牌服务未返回令牌".to_string()));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull,push""#;
        assert_eq!(
            Challenge::parse(header),
            Some(Challenge::Bearer {
                realm: "https://auth.docker.io/token".to_string(),
                service: Some("registry.docker.io".to_string()),
                scope: Some("repository:library/nginx:pull,push".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_other_challenges() {
        assert_eq!(Challenge::parse(r#"Basic realm="registry""#), Some(Challenge::Basic));
        assert_eq!(Challenge::parse("Bearer service=x"), None);
        assert_eq!(Challenge::parse("Negotiate abc"), None);
    }

    #[test]
    fn test_basic_header() {
        let credential = RegistryCredential {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(basic_header(&credential), "Basic YWRtaW46c2VjcmV0");
    }
}
