pub mod build;
pub mod check;
pub mod image;
pub mod language;
pub mod plugin;
pub mod share;
pub mod task;
pub mod version;

pub use build::{BuildRequest, BuildResponse, CommitInfo, HostAlias, MediumType};
pub use check::{
    service_check_key, CheckErrorInfo, CheckSeverity, CheckStatus, ServiceCheckResult,
    ServiceInfo, ServicePort,
};
pub use image::{same_registry, ImageRef};
pub use language::Language;
pub use plugin::{PluginBuildStatus, PluginBuildVersion};
pub use share::{
    app_export_key, app_import_key, share_result_key, AppTransferRecord, ShareResult,
    ShareStatus, TransferStatus,
};
pub use task::{Task, TaskType};
pub use version::{DeliveredType, FinalStatus, VersionRecord};
