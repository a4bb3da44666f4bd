use std::sync::Arc;

use builder_core::models::DeliveredType;
use builder_core::{BuilderResult, ContainerRuntime, SlugStorage, VersionRecord, VersionRepository};
use tracing::{debug, info, instrument, warn};

/// 每个组件保留最近的若干个版本，更早版本的本地镜像或 slug 文件连同记录一起删除
#[derive(Clone)]
pub struct SlugSweeper {
    versions: Arc<dyn VersionRepository>,
    containers: Arc<dyn ContainerRuntime>,
    slugs: Arc<dyn SlugStorage>,
    retain: usize,
}

impl SlugSweeper {
    pub fn new(
        versions: Arc<dyn VersionRepository>,
        containers: Arc<dyn ContainerRuntime>,
        slugs: Arc<dyn SlugStorage>,
        retain: usize,
    ) -> Self {
        Self {
            versions,
            containers,
            slugs,
            retain,
        }
    }

    async fn remove_artifact(&self, record: &VersionRecord) -> BuilderResult<()> {
        if record.delivered_path.is_empty() {
            return Ok(());
        }
        match record.delivered_type {
            Some(DeliveredType::Image) => self.containers.remove(&record.delivered_path).await,
            Some(DeliveredType::Slug) => self.slugs.remove(&record.delivered_path).await,
            None => Ok(()),
        }
    }

    /// 返回删除的版本数
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> BuilderResult<usize> {
        let mut removed = 0;
        for component_id in self.versions.list_component_ids().await? {
            let records = self.versions.list_by_component(&component_id).await?;
            for record in records.iter().skip(self.retain) {
                if let Err(e) = self.remove_artifact(record).await {
                    warn!(
                        component_id = %record.component_id,
                        deploy_version = %record.deploy_version,
                        error = %e,
                        "删除旧版本交付物失败，保留记录"
                    );
                    continue;
                }
                self.versions
                    .delete(&record.component_id, &record.deploy_version)
                    .await?;
                removed += 1;
                debug!(
                    component_id = %record.component_id,
                    deploy_version = %record.deploy_version,
                    "旧版本已清理"
                );
            }
        }
        info!(removed, retain = self.retain, "本地旧版本清理完成");
        Ok(removed)
    }
}
