use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use builder_core::config::{AppConfig, EventLogSink};
use builder_core::{LoggerFactory, ProcessRunner, TaskQueue};
use builder_infrastructure::{
    install_metrics_exporter, DatabaseManager, DockerCli, LocalSlugStorage, MessageQueueFactory,
    PostgresComponentRepository, PostgresPluginVersionRepository, PostgresVersionRepository,
    RedisKeyValueStore, RedisLoggerFactory, RegistryClient, TracingLoggerFactory,
    TrustedRegistryClient,
};
use builder_source::DefaultSourceAcquirer;
use builder_worker::{
    Dispatcher, GarbageCollector, GcService, SlugSweeper, TaskEngine, WorkerContext,
    WorkerSettings,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// 构建服务进程：任务引擎加后台镜像回收
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    engine: Arc<TaskEngine>,
    gc: GcService,
}

impl Application {
    /// 连接所有外部依赖并组装工作器上下文
    pub async fn new(config: AppConfig) -> Result<Self> {
        install_metrics_exporter(&config.observability)?;

        info!("连接数据库: {}", mask_url(&config.database.url));
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("运行数据库迁移失败")?;
        let pool = database.pool().clone();

        info!("连接消息队列: {}", mask_url(&config.message_queue.url));
        let queue: Arc<dyn TaskQueue> = MessageQueueFactory::create(&config.message_queue)
            .await
            .context("连接消息队列失败")?;

        let kv = RedisKeyValueStore::new(&config.kv_store)
            .await
            .context("连接键值存储失败")?;
        let loggers: Arc<dyn LoggerFactory> = match config.observability.event_log {
            EventLogSink::Redis => Arc::new(RedisLoggerFactory::new(kv.connection())),
            EventLogSink::Tracing => Arc::new(TracingLoggerFactory),
        };

        let registry = RegistryClient::from_config(&config.registry)
            .context("创建镜像仓库客户端失败")?;
        let trusted = TrustedRegistryClient::new(registry.resolver());

        let runner = Arc::new(ProcessRunner::new());
        let containers = Arc::new(DockerCli::new(runner.clone(), config.build.docker_bin.clone()));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source.clone_timeout_seconds))
            .build()
            .context("创建HTTP客户端失败")?;
        let source = DefaultSourceAcquirer::from_config(&config.source, runner, http);
        let slugs = Arc::new(LocalSlugStorage::new(config.source.data_root.clone()));

        let versions = Arc::new(PostgresVersionRepository::new(pool.clone()));
        let components = Arc::new(PostgresComponentRepository::new(pool.clone()));

        let ctx = Arc::new(WorkerContext {
            settings: WorkerSettings::from_config(&config),
            queue: queue.clone(),
            versions: versions.clone(),
            components: components.clone(),
            plugin_versions: Arc::new(PostgresPluginVersionRepository::new(pool)),
            kv: Arc::new(kv),
            slugs: slugs.clone(),
            containers: containers.clone(),
            registry: Arc::new(registry),
            trusted: Arc::new(trusted),
            source: Arc::new(source),
            loggers,
        });

        let collector = Arc::new(GarbageCollector::new(
            ctx.registry.clone(),
            versions.clone(),
            components,
        ));
        let sweeper = Arc::new(SlugSweeper::new(
            versions,
            containers,
            slugs,
            config.gc.retain_versions,
        ));
        let gc = GcService::new(collector, sweeper, config.gc.clone());

        let dispatcher = Arc::new(Dispatcher::new(ctx));
        let engine = Arc::new(TaskEngine::new(&config.engine, queue, dispatcher));

        Ok(Self {
            config,
            database,
            engine,
            gc,
        })
    }

    /// 运行直到收到关闭信号或出队循环退出
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(topic = %self.config.engine.topic, "启动构建服务");
        self.engine.start().await?;
        if let Err(e) = self.gc.start().await {
            warn!(error = %e, "启动垃圾回收失败");
        }

        tokio::select! {
            _ = shutdown_rx.recv() => info!("构建服务收到关闭信号"),
            _ = self.engine.finished() => warn!("出队循环已退出"),
        }

        let result = self.engine.stop().await;
        if let Err(e) = self.gc.stop().await {
            warn!(error = %e, "停止垃圾回收失败");
        }
        self.database.close().await;

        if let Err(e) = &result {
            error!(error = %e, "任务引擎异常退出");
        }
        info!(stats = ?self.engine.stats(), "构建服务已停止");
        result.context("任务引擎异常退出")
    }
}

/// 屏蔽连接串中的密码
fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if url[colon_pos..].starts_with("://") {
                return url.to_string();
            }
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("postgres://kato:secret@db:5432/region"),
            "postgres://kato:***@db:5432/region"
        );
        assert_eq!(
            mask_url("amqp://guest:guest@mq:5672/%2f"),
            "amqp://guest:***@mq:5672/%2f"
        );
        assert_eq!(mask_url("redis://127.0.0.1:6379/0"), "redis://127.0.0.1:6379/0");
        assert_eq!(mask_url("amqp://user@mq:5672"), "amqp://user@mq:5672");
    }
}
