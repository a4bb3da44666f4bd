use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::{BuildConfig, RegistryConfig};
use builder_core::{
    BuildRequest, BuildResponse, BuilderError, BuilderResult, ContainerRuntime,
    ImageBuildOptions, LogStatus,
};
use builder_source::dockerfile::Dockerfile;
use tracing::{info, instrument, warn};

use super::{expand_vars, BuildStrategy};

const ARG_PREFIX: &str = "ARG_";

/// 用项目自带的 Dockerfile 构建镜像并推送到内部仓库
pub struct DockerfileBuilder {
    containers: Arc<dyn ContainerRuntime>,
    registry: RegistryConfig,
    build: BuildConfig,
}

impl DockerfileBuilder {
    pub fn new(
        containers: Arc<dyn ContainerRuntime>,
        registry: RegistryConfig,
        build: BuildConfig,
    ) -> Self {
        Self {
            containers,
            registry,
            build,
        }
    }

    /// `ARG_<NAME>` 环境变量作为构建参数，值按同一张表展开变量
    pub fn build_args(request: &BuildRequest) -> BuilderResult<BTreeMap<String, String>> {
        request
            .build_envs
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(ARG_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name, value))
            })
            .map(|(name, value)| Ok((name.to_string(), expand_vars(value, &request.build_envs)?)))
            .collect()
    }
}

#[async_trait]
impl BuildStrategy for DockerfileBuilder {
    #[instrument(skip(self, request), fields(
        component_id = %request.component_id,
        deploy_version = %request.deploy_version,
    ))]
    async fn build(&self, request: &BuildRequest) -> BuilderResult<BuildResponse> {
        let logger = &request.logger;
        let dockerfile_path = request.source_dir.join("Dockerfile");
        if let Err(e) = Dockerfile::load(&dockerfile_path) {
            logger
                .error(&format!("Dockerfile 解析失败: {e}"), "build-image", LogStatus::Failure)
                .await;
            return Err(e);
        }

        let target = self
            .registry
            .component_image(&request.component_id, &request.deploy_version);
        let options = ImageBuildOptions {
            context_dir: request.source_dir.clone(),
            dockerfile: Some(dockerfile_path),
            tag: target.clone(),
            build_args: Self::build_args(request)?,
            no_cache: request.no_cache(),
            add_hosts: request
                .host_aliases
                .iter()
                .flat_map(|alias| alias.to_add_host_args())
                .collect(),
        };

        logger
            .info(&format!("开始构建镜像 {target}"), "build-image", LogStatus::Starting)
            .await;
        self.containers
            .build(&options, self.build.build_timeout())
            .await?;
        if self.containers.inspect(&target).await?.is_none() {
            return Err(BuilderError::build_failed(format!(
                "构建完成后未找到镜像 {target}"
            )));
        }
        logger
            .info("镜像构建完成", "build-image", LogStatus::Success)
            .await;

        logger
            .info(&format!("推送镜像 {target}"), "push-image", LogStatus::Starting)
            .await;
        let credential = self.registry.local_credential();
        self.containers
            .push(&target, credential.as_ref(), self.build.push_timeout())
            .await?;
        logger
            .info("镜像推送完成", "push-image", LogStatus::Success)
            .await;

        if let Err(e) = self.containers.remove(&target).await {
            warn!(image = %target, error = %e, "删除本地镜像失败");
        }
        info!(image = %target, "Dockerfile 构建完成");
        Ok(BuildResponse::image(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder_core::models::MediumType;
    use builder_testing_utils::{write_files, BuildRequestBuilder, MockContainerRuntime};

    fn builder(runtime: &MockContainerRuntime) -> DockerfileBuilder {
        DockerfileBuilder::new(
            Arc::new(runtime.clone()),
            RegistryConfig {
                user: "admin".to_string(),
                pass: "secret".to_string(),
                ..Default::default()
            },
            BuildConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_build_push_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            &[("Dockerfile", "ARG VERSION\nFROM alpine:3.19\nEXPOSE 80\n")],
        );
        let (request, logger) = BuildRequestBuilder::new(dir.path())
            .with_component("T", "Comp1")
            .with_version("20230101120000")
            .with_env("ARG_VERSION", "${BASE}-1")
            .with_env("BASE", "3.19")
            .with_env("NO_CACHE", "true")
            .with_host_alias("10.0.0.8", &["git.local"])
            .build();

        let runtime = MockContainerRuntime::new();
        let response = builder(&runtime).build(&request).await.unwrap();

        assert_eq!(response.medium_type, MediumType::Image);
        assert_eq!(response.medium_path, "hub.kato.me/comp1:20230101120000");

        let builds = runtime.builds();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].build_args["VERSION"], "3.19-1");
        assert!(!builds[0].build_args.contains_key("BASE"));
        assert!(builds[0].no_cache);
        assert_eq!(builds[0].add_hosts, vec!["git.local:10.0.0.8"]);

        let pushes = runtime.pushes();
        assert_eq!(pushes[0].image, "hub.kato.me/comp1:20230101120000");
        assert_eq!(pushes[0].user.as_deref(), Some("admin"));
        assert!(!runtime.has_image("hub.kato.me/comp1:20230101120000"));
        assert!(logger.errors().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_dockerfile_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &[("Dockerfile", "RUN echo missing from\n")]);
        let (request, logger) = BuildRequestBuilder::new(dir.path()).build();

        let runtime = MockContainerRuntime::new();
        assert!(builder(&runtime).build(&request).await.is_err());
        assert!(runtime.builds().is_empty());
        assert_eq!(logger.errors().len(), 1);
    }
}
