use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use builder_core::config::{BuildConfig, RegistryConfig};
use builder_core::{
    BuildRequest, BuildResponse, BuilderError, BuilderResult, ContainerRuntime,
    ImageBuildOptions, LogStatus, RunOptions,
};
use tracing::{debug, info, instrument, warn};

use super::{BuildStrategy, BUILD_MEDIUM_ENV};

/// buildpack 容器内的目录
const APP_DIR: &str = "/tmp/app";
const CACHE_DIR: &str = "/tmp/cache";
const SLUG_DIR: &str = "/tmp/slug";

/// 运行 buildpack 生成 slug，按需打包成运行镜像
pub struct SlugBuilder {
    containers: Arc<dyn ContainerRuntime>,
    registry: RegistryConfig,
    build: BuildConfig,
}

impl SlugBuilder {
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

    /// slug 输出路径 `<tgz_dir>/<component>/<version>.tgz`
    pub fn slug_path(request: &BuildRequest) -> PathBuf {
        request
            .tgz_dir
            .join(&request.component_id)
            .join(format!("{}.tgz", request.deploy_version))
    }

    fn runner_options(&self, request: &BuildRequest, slug_dir: &Path) -> RunOptions {
        let mut envs: BTreeMap<String, String> = request
            .build_envs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        envs.insert("SLUG_VERSION".to_string(), request.deploy_version.clone());
        envs.insert("SERVICE_ID".to_string(), request.component_id.clone());
        envs.insert("TENANT_ID".to_string(), request.tenant_id.clone());
        envs.insert("LANGUAGE".to_string(), request.lang.as_str().to_string());
        envs.insert("CODE_COMMIT_HASH".to_string(), request.commit.hash.clone());
        if !request.runtime.is_empty() {
            envs.insert("RUNTIME".to_string(), request.runtime.clone());
        }
        if request.no_cache() {
            envs.insert("NO_CACHE".to_string(), "true".to_string());
        }

        RunOptions {
            image: self.build.builder_image.clone(),
            args: vec!["local".to_string()],
            envs,
            volumes: vec![
                format!("{}:{APP_DIR}", request.source_dir.display()),
                format!("{}:{CACHE_DIR}", request.cache_dir.display()),
                format!("{}:{SLUG_DIR}", slug_dir.display()),
            ],
            workdir: Some(APP_DIR.to_string()),
            timeout: Some(self.build.build_timeout()),
        }
    }

    /// 把 slug 放进运行镜像并推送
    async fn package_image(&self, request: &BuildRequest, slug: &Path) -> BuilderResult<String> {
        let logger = &request.logger;
        let target = self
            .registry
            .component_image(&request.component_id, &request.deploy_version);
        let context_dir = request
            .tgz_dir
            .join(&request.component_id)
            .join(format!(".image-{}", request.deploy_version));
        tokio::fs::create_dir_all(&context_dir).await?;
        tokio::fs::copy(slug, context_dir.join("slug.tgz")).await?;
        tokio::fs::write(
            context_dir.join("Dockerfile"),
            format!(
                "FROM {}\nCOPY slug.tgz /tmp/slug/slug.tgz\n",
                self.build.runner_image
            ),
        )
        .await?;

        logger
            .info(&format!("打包运行镜像 {target}"), "build-image", LogStatus::Starting)
            .await;
        let options = ImageBuildOptions {
            context_dir: context_dir.clone(),
            dockerfile: Some(context_dir.join("Dockerfile")),
            tag: target.clone(),
            ..Default::default()
        };
        let built = self
            .containers
            .build(&options, self.build.build_timeout())
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&context_dir).await {
            warn!(dir = %context_dir.display(), error = %e, "清理镜像构建目录失败");
        }
        built?;

        let credential = self.registry.local_credential();
        self.containers
            .push(&target, credential.as_ref(), self.build.push_timeout())
            .await?;
        if let Err(e) = self.containers.remove(&target).await {
            warn!(image = %target, error = %e, "删除本地镜像失败");
        }
        logger
            .info("运行镜像推送完成", "build-image", LogStatus::Success)
            .await;
        Ok(target)
    }
}

#[async_trait]
impl BuildStrategy for SlugBuilder {
    #[instrument(skip(self, request), fields(
        component_id = %request.component_id,
        deploy_version = %request.deploy_version,
        lang = %request.lang,
    ))]
    async fn build(&self, request: &BuildRequest) -> BuilderResult<BuildResponse> {
        let logger = &request.logger;
        let slug = Self::slug_path(request);
        let slug_dir = slug
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| request.tgz_dir.clone());
        tokio::fs::create_dir_all(&slug_dir).await?;
        tokio::fs::create_dir_all(&request.cache_dir).await?;

        logger
            .info(
                &format!("开始编译 {} 源码", request.lang),
                "build-code",
                LogStatus::Starting,
            )
            .await;
        let output = self
            .containers
            .run(&self.runner_options(request, &slug_dir))
            .await?;
        debug!(output = %output.tail(20), "buildpack 执行完成");

        if !tokio::fs::try_exists(&slug).await.unwrap_or(false) {
            return Err(BuilderError::build_failed(format!(
                "编译完成但未生成 {}",
                slug.display()
            )));
        }
        logger
            .info("源码编译完成", "build-code", LogStatus::Success)
            .await;

        if request.env(BUILD_MEDIUM_ENV) == Some("slug") {
            info!(slug = %slug.display(), "交付 slug");
            return Ok(BuildResponse::slug(slug.display().to_string()));
        }

        let image = self.package_image(request, &slug).await?;
        info!(image = %image, "slug 已打包为镜像");
        Ok(BuildResponse::image(image))
    }
}
