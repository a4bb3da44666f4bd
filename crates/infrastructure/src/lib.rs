//! 构建服务的外部协作方实现：消息队列、数据库、键值存储、事件日志、镜像仓库和容器运行时

pub mod database;
pub mod docker;
pub mod event_log;
pub mod in_memory_queue;
pub mod kv_store;
pub mod message_queue;
pub mod message_queue_factory;
pub mod observability;
pub mod registry;
pub mod slug_storage;

pub use database::*;
pub use docker::DockerCli;
pub use event_log::{RedisEventLogger, RedisLoggerFactory, TracingLoggerFactory};
pub use in_memory_queue::InMemoryTaskQueue;
pub use kv_store::RedisKeyValueStore;
pub use message_queue::RabbitMqTaskQueue;
pub use message_queue_factory::MessageQueueFactory;
pub use observability::install_metrics_exporter;
pub use registry::{HostResolver, RegistryClient, TrustedRegistryClient};
pub use slug_storage::LocalSlugStorage;
