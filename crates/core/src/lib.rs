//! 构建服务核心库：错误类型、配置、数据模型和外部协作方接口

pub mod config;
pub mod errors;
pub mod i18n;
pub mod logging;
pub mod models;
pub mod process;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    BuildRequest, BuildResponse, CommitInfo, DeliveredType, FinalStatus, ImageRef, Language,
    MediumType, Task, TaskType, VersionRecord,
};
pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use traits::*;

/// 产品名称，用于键值存储的键前缀
pub const PRODUCT_NAME: &str = "kato";
