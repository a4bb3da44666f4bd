//! 构建核心依赖的外部协作方接口

pub mod container;
pub mod kv_store;
pub mod logger;
pub mod registry;
pub mod repository;
pub mod storage;
pub mod task_queue;

pub use container::*;
pub use kv_store::*;
pub use logger::*;
pub use registry::*;
pub use repository::*;
pub use storage::*;
pub use task_queue::*;
