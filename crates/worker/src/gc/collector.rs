use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use builder_core::{BuilderError, BuilderResult, ComponentRepository, RegistryApi, VersionRepository};
use tracing::{debug, error, info, instrument, warn};

/// 回收原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeReason {
    /// 组件已删除
    FreeComponent,
    /// 版本不再被引用
    FreeVersion,
}

impl FreeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreeReason::FreeComponent => "free-component",
            FreeReason::FreeVersion => "free-version",
        }
    }
}

/// 可以删除的镜像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeImage {
    pub repository: String,
    pub tag: String,
    pub digest: String,
    pub reason: FreeReason,
}

/// 一次清理的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub free_component: usize,
    pub free_version: usize,
    pub deleted: usize,
    pub skipped: usize,
}

/// 一类镜像的收集结果，`skipped` 为读取失败而跳过的仓库数
#[derive(Default)]
struct Collected {
    images: Vec<FreeImage>,
    skipped: usize,
}

impl Collected {
    fn skip_repository(&mut self, repository: &str, error: &BuilderError) {
        self.skipped += 1;
        warn!(repository = %repository, error = %error, "读取仓库失败，跳过");
    }
}

/// 组件镜像在内部仓库中的仓库名
pub fn component_repository(component_id: &str) -> String {
    component_id.to_lowercase()
}

/// 清理内部镜像仓库中不再使用的镜像
#[derive(Clone)]
pub struct GarbageCollector {
    registry: Arc<dyn RegistryApi>,
    versions: Arc<dyn VersionRepository>,
    components: Arc<dyn ComponentRepository>,
}

impl GarbageCollector {
    pub fn new(
        registry: Arc<dyn RegistryApi>,
        versions: Arc<dyn VersionRepository>,
        components: Arc<dyn ComponentRepository>,
    ) -> Self {
        Self {
            registry,
            versions,
            components,
        }
    }

    async fn free_image(
        &self,
        repository: &str,
        tag: &str,
        reason: FreeReason,
    ) -> BuilderResult<FreeImage> {
        let digest = self.registry.manifest_digest_v2(repository, tag).await?;
        Ok(FreeImage {
            repository: repository.to_string(),
            tag: tag.to_string(),
            digest,
            reason,
        })
    }

    /// 已删除组件的全部镜像
    pub async fn free_component_images(&self) -> BuilderResult<Vec<FreeImage>> {
        Ok(self.collect_free_components().await?.images)
    }

    /// 在用组件中不再被任何可用版本引用的镜像
    pub async fn free_version_images(&self) -> BuilderResult<Vec<FreeImage>> {
        Ok(self.collect_free_versions().await?.images)
    }

    async fn collect_free_components(&self) -> BuilderResult<Collected> {
        let mut collected = Collected::default();
        for component_id in self.components.list_deleted_components().await? {
            let repository = component_repository(&component_id);
            let tags = match self.registry.tags(&repository).await {
                Ok(tags) => tags,
                Err(e) => {
                    collected.skip_repository(&repository, &e);
                    continue;
                }
            };
            for tag in tags {
                match self
                    .free_image(&repository, &tag, FreeReason::FreeComponent)
                    .await
                {
                    Ok(image) => collected.images.push(image),
                    Err(e) => warn!(repository = %repository, tag = %tag, error = %e, "获取镜像摘要失败"),
                }
            }
        }
        Ok(collected)
    }

    /// 与被引用标签共用同一清单的标签不会被回收
    async fn collect_free_versions(&self) -> BuilderResult<Collected> {
        let mut collected = Collected::default();
        for component_id in self.components.list_live_components().await? {
            let repository = component_repository(&component_id);
            let tags = match self.registry.tags(&repository).await {
                Ok(tags) => tags,
                Err(e) => {
                    collected.skip_repository(&repository, &e);
                    continue;
                }
            };
            if tags.is_empty() {
                continue;
            }
            let referenced: HashSet<String> = match self
                .versions
                .list_usable_versions(&component_id)
                .await
            {
                Ok(versions) => versions.into_iter().map(|v| v.to_lowercase()).collect(),
                Err(e) => {
                    collected.skip_repository(&repository, &e);
                    continue;
                }
            };
            let (kept, candidates): (Vec<String>, Vec<String>) = tags
                .into_iter()
                .partition(|tag| referenced.contains(&tag.to_lowercase()));

            let mut kept_digests = HashSet::new();
            let mut unresolved = None;
            for tag in &kept {
                match self.registry.manifest_digest_v2(&repository, tag).await {
                    Ok(digest) => {
                        kept_digests.insert(digest);
                    }
                    Err(e) => {
                        unresolved = Some(e);
                        break;
                    }
                }
            }
            // 被引用标签的摘要不完整时无法判断共用清单，整个仓库跳过
            if let Some(e) = unresolved {
                collected.skip_repository(&repository, &e);
                continue;
            }

            for tag in candidates {
                match self.free_image(&repository, &tag, FreeReason::FreeVersion).await {
                    Ok(image) if kept_digests.contains(&image.digest) => {
                        debug!(repository = %repository, tag = %tag, "清单仍被在用版本引用，保留");
                    }
                    Ok(image) => collected.images.push(image),
                    Err(e) => warn!(repository = %repository, tag = %tag, error = %e, "获取镜像摘要失败"),
                }
            }
        }
        Ok(collected)
    }

    /// 完整清理一次：合并两类镜像，按仓库与摘要去重后逐个删除
    ///
    /// 仓库未开启删除时中止并返回 `RegistryWriteDisabled`，其余单个仓库或镜像的错误跳过，
    /// 计入 `skipped`。
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> BuilderResult<GcReport> {
        let started = Instant::now();
        let free_components = self.collect_free_components().await?;
        let free_versions = self.collect_free_versions().await?;
        let mut report = GcReport {
            free_component: free_components.images.len(),
            free_version: free_versions.images.len(),
            skipped: free_components.skipped + free_versions.skipped,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for image in free_components.images.into_iter().chain(free_versions.images) {
            if !seen.insert((image.repository.clone(), image.digest.clone())) {
                continue;
            }
            match self
                .registry
                .delete_manifest(&image.repository, &image.digest)
                .await
            {
                Ok(()) => {
                    report.deleted += 1;
                    metrics::counter!("builder_gc_deleted_total").increment(1);
                    debug!(
                        repository = %image.repository,
                        tag = %image.tag,
                        reason = image.reason.as_str(),
                        "镜像已删除"
                    );
                }
                Err(BuilderError::RegistryWriteDisabled) => {
                    error!(
                        "镜像仓库不支持删除，请设置 REGISTRY_STORAGE_DELETE_ENABLED=true 后重启仓库"
                    );
                    return Err(BuilderError::RegistryWriteDisabled);
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(repository = %image.repository, digest = %image.digest, error = %e, "删除镜像失败，跳过");
                }
            }
        }

        info!(
            free_component = report.free_component,
            free_version = report.free_version,
            deleted = report.deleted,
            skipped = report.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "镜像回收完成"
        );
        Ok(report)
    }
}
