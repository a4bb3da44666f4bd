use async_trait::async_trait;
use builder_core::models::Task;
use builder_core::{BuilderError, BuilderResult, LogStatus};
use serde::Deserialize;
use tracing::info;

use super::{Worker, WorkerRun};
use crate::context::WorkerContext;
use crate::gc::GarbageCollector;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcTaskBody {
    #[serde(default)]
    pub event_id: String,
}

/// 按需执行一次镜像回收
pub struct GarbageCollectionWorker {
    body: GcTaskBody,
}

impl GarbageCollectionWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body = if task.body.is_null() {
            GcTaskBody::default()
        } else {
            task.parse_body()?
        };
        Ok(Self { body })
    }
}

#[async_trait]
impl Worker for GarbageCollectionWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let collector = GarbageCollector::new(
            ctx.registry.clone(),
            ctx.versions.clone(),
            ctx.components.clone(),
        );
        let report = collector.sweep().await?;
        info!(?report, "按需镜像回收完成");
        run.step(
            &format!(
                "镜像回收完成，删除 {} 个，跳过 {} 个",
                report.deleted, report.skipped
            ),
            "gc",
            LogStatus::Success,
        )
        .await;
        Ok(())
    }

    async fn on_failure(&self, _ctx: &WorkerContext, _error: &BuilderError) -> BuilderResult<()> {
        Ok(())
    }
}
