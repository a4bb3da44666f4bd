use std::sync::Arc;

use builder_core::config::GcConfig;
use builder_core::BuilderResult;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::{GarbageCollector, GcReport, SlugSweeper};

/// 周期性回收服务
///
/// 按 `gc.interval` 清理镜像仓库，按 `gc.slug_sweep_interval` 清理本地旧版本。
pub struct GcService {
    collector: Arc<GarbageCollector>,
    sweeper: Arc<SlugSweeper>,
    config: GcConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl GcService {
    pub fn new(collector: Arc<GarbageCollector>, sweeper: Arc<SlugSweeper>, config: GcConfig) -> Self {
        Self {
            collector,
            sweeper,
            config,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub async fn start(&mut self) -> BuilderResult<()> {
        if !self.config.enabled {
            info!("镜像回收服务未启用");
            return Ok(());
        }
        if self.handle.is_some() {
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let collector = self.collector.clone();
        let sweeper = self.sweeper.clone();
        let gc_every = self.config.interval();
        let sweep_every = self.config.slug_sweep_interval();
        info!(?gc_every, ?sweep_every, "启动镜像回收服务");

        let handle = tokio::spawn(async move {
            let mut gc_tick = interval_at(Instant::now() + gc_every, gc_every);
            gc_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sweep_tick = interval_at(Instant::now() + sweep_every, sweep_every);
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = gc_tick.tick() => {
                        if let Err(e) = collector.sweep().await {
                            error!(error = %e, "镜像回收失败");
                        }
                    }
                    _ = sweep_tick.tick() => {
                        if let Err(e) = sweeper.sweep().await {
                            error!(error = %e, "本地旧版本清理失败");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("镜像回收服务收到停止信号");
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) -> BuilderResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "等待镜像回收服务退出失败");
            }
        }
        info!("镜像回收服务已停止");
        Ok(())
    }

    /// 立即清理一次镜像仓库
    pub async fn collect_once(&self) -> BuilderResult<GcReport> {
        self.collector.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder_testing_utils::{
        MockComponentRepository, MockContainerRuntime, MockRegistryApi, MockSlugStorage,
        MockVersionRepository,
    };

    fn service(config: GcConfig) -> GcService {
        let versions = Arc::new(MockVersionRepository::new());
        let collector = GarbageCollector::new(
            Arc::new(MockRegistryApi::new()),
            versions.clone(),
            Arc::new(MockComponentRepository::new(&[], &[])),
        );
        let sweeper = SlugSweeper::new(
            versions,
            Arc::new(MockContainerRuntime::new()),
            Arc::new(MockSlugStorage::new()),
            config.retain_versions,
        );
        GcService::new(Arc::new(collector), Arc::new(sweeper), config)
    }

    #[tokio::test]
    async fn test_disabled_service_does_not_start() {
        let mut service = service(GcConfig {
            enabled: false,
            ..Default::default()
        });
        service.start().await.unwrap();
        assert!(!service.is_running());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut service = service(GcConfig::default());
        service.start().await.unwrap();
        assert!(service.is_running());
        service.stop().await.unwrap();
        assert!(!service.is_running());
        assert_eq!(service.collect_once().await.unwrap(), GcReport::default());
    }
}
