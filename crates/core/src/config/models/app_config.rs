use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    build::BuildConfig, database::DatabaseConfig, engine::EngineConfig, gc::GcConfig,
    kv_store::KvStoreConfig, message_queue::MessageQueueConfig,
    observability::ObservabilityConfig, registry::RegistryConfig, source::SourceConfig,
};

/// 默认配置文件搜索路径
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/builder.toml",
    "builder.toml",
    "/etc/kato/builder.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub kv_store: KvStoreConfig,
    pub registry: RegistryConfig,
    pub engine: EngineConfig,
    pub source: SourceConfig,
    pub build: BuildConfig,
    pub gc: GcConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: BUILDER_)
    /// 4. Legacy environment variables
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("BUILDER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.apply_legacy_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn apply_legacy_env(&mut self) {
        self.apply_legacy_env_from(|key| std::env::var(key).ok());
    }

    /// 应用兼容旧部署的环境变量，空值视为未设置
    pub fn apply_legacy_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(dir) = get("SOURCE_DIR") {
            self.source.source_dir = PathBuf::from(dir);
        }
        if let Some(user) = get("LOCAL_HUB_USER") {
            self.registry.user = user;
        }
        if let Some(pass) = get("LOCAL_HUB_PASS") {
            self.registry.pass = pass;
        }
        if let Some(flag) = get("DISABLE_IMAGE_CACHE") {
            self.build.disable_image_cache = flag == "true";
        }
        if let Some(proxy) = get("GITHUB_PROXY") {
            self.source.github_proxy = Some(proxy);
        }
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;
        self.kv_store.validate().context("键值存储配置验证失败")?;
        self.registry.validate().context("镜像仓库配置验证失败")?;
        self.engine.validate().context("任务引擎配置验证失败")?;
        self.source.validate().context("源码配置验证失败")?;
        self.build.validate().context("构建配置验证失败")?;
        self.gc.validate().context("垃圾回收配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
