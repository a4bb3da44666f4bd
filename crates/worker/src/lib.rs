//! 构建任务的执行端：任务引擎、按类型分发的工作器、构建策略和镜像回收

pub mod action;
pub mod build;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod gc;
pub mod progress;
pub mod retry;
pub mod workers;

pub use build::{strategy_for, BuildStrategy, DockerfileBuilder, SlugBuilder};
pub use context::{WorkerContext, WorkerSettings};
pub use dispatch::{create_worker, Dispatcher};
pub use engine::{requeue_hook, EngineStats, ReturnTaskHook, TaskEngine, TaskHandler};
pub use gc::{GarbageCollector, GcReport, GcService, SlugSweeper};
pub use progress::{ProgressEvent, ProgressReporter, TaskStage};
pub use workers::{Worker, WorkerRun};
