//! 构建策略：把准备好的工作树变成镜像或 slug

pub mod dockerfile;
pub mod slug;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::{BuildConfig, RegistryConfig};
use builder_core::{BuildRequest, BuildResponse, BuilderError, BuilderResult, ContainerRuntime, Language};
use regex::Regex;

pub use dockerfile::DockerfileBuilder;
pub use slug::SlugBuilder;

/// `BUILD_MEDIUM=slug` 时直接交付 slug 文件
pub const BUILD_MEDIUM_ENV: &str = "BUILD_MEDIUM";

#[async_trait]
pub trait BuildStrategy: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> BuilderResult<BuildResponse>;
}

/// Dockerfile 项目使用镜像构建，其余语言走 buildpack
pub fn strategy_for(
    lang: Language,
    containers: Arc<dyn ContainerRuntime>,
    registry: &RegistryConfig,
    build: &BuildConfig,
) -> Box<dyn BuildStrategy> {
    match lang {
        Language::Dockerfile => Box::new(DockerfileBuilder::new(
            containers,
            registry.clone(),
            build.clone(),
        )),
        _ => Box::new(SlugBuilder::new(containers, registry.clone(), build.clone())),
    }
}

/// 按 shell 规则展开 `$NAME` 与 `${NAME}`，未定义的变量替换为空串
pub fn expand_vars(value: &str, envs: &HashMap<String, String>) -> BuilderResult<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| BuilderError::internal(format!("变量表达式无效: {e}")))?;
    let expanded = pattern.replace_all(value, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        envs.get(name).cloned().unwrap_or_default()
    });
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_vars() {
        let envs = HashMap::from([
            ("VERSION".to_string(), "1.2".to_string()),
            ("MIRROR".to_string(), "https://m.example".to_string()),
        ]);
        assert_eq!(
            expand_vars("${MIRROR}/v$VERSION/pkg", &envs).unwrap(),
            "https://m.example/v1.2/pkg"
        );
        assert_eq!(expand_vars("x-$MISSING-y", &envs).unwrap(), "x--y");
        assert_eq!(expand_vars("no vars", &envs).unwrap(), "no vars");
    }
}
