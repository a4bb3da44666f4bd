use std::sync::Arc;
use std::time::Duration;

use builder_core::config::{AppConfig, BuildConfig, GcConfig, RegistryConfig, SourceConfig};
use builder_core::{
    ComponentRepository, ContainerRuntime, KeyValueStore, LoggerFactory, PluginVersionRepository,
    RegistryApi, SlugStorage, TaskQueue, TrustedRegistry, VersionRepository, PRODUCT_NAME,
};
use builder_source::SourceAcquirer;

/// 工作器可见的只读配置
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub registry: RegistryConfig,
    pub build: BuildConfig,
    pub source: SourceConfig,
    pub gc: GcConfig,
    /// 升级动作投递的主题
    pub worker_topic: String,
    /// 键值存储键的前缀
    pub product: String,
    /// 重试间隔基数，第 n 次重试等待 n 倍
    pub retry_delay: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            registry: config.registry.clone(),
            build: config.build.clone(),
            source: config.source.clone(),
            gc: config.gc.clone(),
            worker_topic: config.engine.worker_topic.clone(),
            product: config.kv_store.product.clone(),
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            build: BuildConfig::default(),
            source: SourceConfig::default(),
            gc: GcConfig::default(),
            worker_topic: "worker".to_string(),
            product: PRODUCT_NAME.to_string(),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// 工作器依赖的外部协作方，进程启动时构造一次
pub struct WorkerContext {
    pub settings: WorkerSettings,
    pub queue: Arc<dyn TaskQueue>,
    pub versions: Arc<dyn VersionRepository>,
    pub components: Arc<dyn ComponentRepository>,
    pub plugin_versions: Arc<dyn PluginVersionRepository>,
    pub kv: Arc<dyn KeyValueStore>,
    pub slugs: Arc<dyn SlugStorage>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub registry: Arc<dyn RegistryApi>,
    pub trusted: Arc<dyn TrustedRegistry>,
    pub source: Arc<dyn SourceAcquirer>,
    pub loggers: Arc<dyn LoggerFactory>,
}
