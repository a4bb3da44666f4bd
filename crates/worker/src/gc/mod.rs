//! 镜像与本地版本回收

pub mod collector;
pub mod service;
pub mod slug_sweep;

pub use collector::{component_repository, FreeImage, FreeReason, GarbageCollector, GcReport};
pub use service::GcService;
pub use slug_sweep::SlugSweeper;
