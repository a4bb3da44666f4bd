pub mod app_config;
pub mod build;
pub mod database;
pub mod engine;
pub mod gc;
pub mod kv_store;
pub mod message_queue;
pub mod observability;
pub mod registry;
pub mod source;

pub use app_config::AppConfig;
pub use build::BuildConfig;
pub use database::DatabaseConfig;
pub use engine::EngineConfig;
pub use gc::GcConfig;
pub use kv_store::KvStoreConfig;
pub use message_queue::{MessageQueueConfig, MessageQueueType};
pub use observability::{EventLogSink, ObservabilityConfig};
pub use registry::{RegistryConfig, RegistryCredential};
pub use source::SourceConfig;
