//! 按任务类型创建工作器并执行

use std::sync::Arc;

use async_trait::async_trait;
use builder_core::models::{Task, TaskType};
use builder_core::{BuilderError, BuilderResult, LogStatus};
use tracing::{error, info, instrument, warn};

use crate::context::WorkerContext;
use crate::engine::TaskHandler;
use crate::progress::ProgressReporter;
use crate::workers::{
    ExportAppWorker, GarbageCollectionWorker, ImageBuildWorker, ImportAppWorker,
    MarketSlugWorker, PluginDockerfileBuildWorker, PluginImageBuildWorker, ServiceCheckWorker,
    ShareImageWorker, ShareSlugWorker, SourceBuildWorker, Worker, WorkerRun,
};

/// 解析任务体并创建对应的工作器
pub fn create_worker(task: &Task) -> BuilderResult<Box<dyn Worker>> {
    let worker: Box<dyn Worker> = match task.kind()? {
        TaskType::BuildFromImage => Box::new(ImageBuildWorker::from_task(task)?),
        TaskType::BuildFromSourceCode => Box::new(SourceBuildWorker::from_task(task)?),
        TaskType::BuildFromMarketSlug => Box::new(MarketSlugWorker::from_task(task)?),
        TaskType::ServiceCheck => Box::new(ServiceCheckWorker::from_task(task)?),
        TaskType::PluginImageBuild => Box::new(PluginImageBuildWorker::from_task(task)?),
        TaskType::PluginDockerfileBuild => {
            Box::new(PluginDockerfileBuildWorker::from_task(task)?)
        }
        TaskType::ShareImage | TaskType::SharePlugin => {
            Box::new(ShareImageWorker::from_task(task)?)
        }
        TaskType::ShareSlug => Box::new(ShareSlugWorker::from_task(task)?),
        TaskType::ExportApp => Box::new(ExportAppWorker::from_task(task)?),
        TaskType::ImportApp => Box::new(ImportAppWorker::from_task(task)?),
        TaskType::GarbageCollection => Box::new(GarbageCollectionWorker::from_task(task)?),
    };
    Ok(worker)
}

/// 引擎的任务处理器：每个任务一个工作器，构建日志按事件归集
pub struct Dispatcher {
    ctx: Arc<WorkerContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }
}

#[async_trait]
impl TaskHandler for Dispatcher {
    #[instrument(skip_all, fields(task_id = %task.task_id, task_type = %task.task_type))]
    async fn handle(&self, task: Task, progress: ProgressReporter) -> BuilderResult<()> {
        let task_type = task.kind()?;
        let worker = create_worker(&task)?;
        let logger = self.ctx.loggers.for_event(worker.event_id());
        let run = WorkerRun {
            ctx: self.ctx.clone(),
            logger: logger.clone(),
            progress,
            max_retries: task_type.max_retries(),
        };
        worker.run(&run).await?;
        logger.close().await;
        info!("任务执行完成");
        Ok(())
    }

    async fn on_failure(&self, task: &Task, error: &BuilderError) {
        let worker = match create_worker(task) {
            Ok(worker) => worker,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "任务参数无效，无法回写失败状态");
                return;
            }
        };
        let logger = self.ctx.loggers.for_event(worker.event_id());
        logger
            .error(&error.user_message(), "callback", LogStatus::Failure)
            .await;
        if let Err(e) = worker.on_failure(&self.ctx, error).await {
            warn!(task_id = %task.task_id, error = %e, "回写失败状态出错");
        }
        logger.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder_testing_utils::TaskBuilder;
    use serde_json::json;

    #[test]
    fn test_every_task_type_has_a_worker() {
        let body = json!({
            "image": "nginx:1.25",
            "image_url": "nginx:1.25",
            "repo_url": "https://git.example.com/demo.git",
            "tenant_id": "t1",
            "service_id": "s1",
            "deploy_version": "v1",
            "event_id": "e1",
            "check_uuid": "c1",
            "source_type": "docker-image",
            "source_body": "nginx",
            "plugin_id": "p1",
            "share_id": "sh1",
            "local_image_name": "hub.kato.me/s1:v1",
            "image_name": "docker.io/acme/s1:v1",
            "local_slug_path": "/grdata/build/s1.tgz",
            "slug_path": "/market/s1.tgz",
            "source_dir": "/grdata/app/export-1",
            "app_metadata": {"apps": []},
            "file": "/grdata/app/export-1.tar.gz",
            "namespace": "acme",
        });
        for task_type in TaskType::ALL {
            let task = TaskBuilder::new(task_type).with_body(body.clone()).build();
            assert!(create_worker(&task).is_ok(), "{task_type} 无法创建工作器");
        }
    }

    #[test]
    fn test_invalid_body_is_rejected() {
        let task = TaskBuilder::new(TaskType::BuildFromImage)
            .with_body(json!({"image": "nginx"}))
            .build();
        assert!(matches!(
            create_worker(&task).err(),
            Some(BuilderError::InvalidTaskParams(_))
        ));

        let task = TaskBuilder::raw("unknown").build();
        assert!(matches!(
            create_worker(&task).err(),
            Some(BuilderError::UnknownTaskType(_))
        ));
    }
}
