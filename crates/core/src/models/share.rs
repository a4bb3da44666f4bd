use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareStatus {
    Success,
    Failure,
}

/// 分享结果，写入 `/<product>/shareresult/<share_id>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResult {
    pub share_id: String,
    pub status: ShareStatus,
}

pub fn share_result_key(product: &str, share_id: &str) -> String {
    format!("/{product}/shareresult/{share_id}")
}

/// 应用导入导出的进度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Running,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppTransferRecord {
    pub event_id: String,
    pub status: TransferStatus,
    #[serde(default)]
    pub tar_file: String,
    #[serde(default)]
    pub message: String,
}

pub fn app_export_key(product: &str, event_id: &str) -> String {
    format!("/{product}/appexport/{event_id}")
}

pub fn app_import_key(product: &str, event_id: &str) -> String {
    format!("/{product}/appimport/{event_id}")
}
