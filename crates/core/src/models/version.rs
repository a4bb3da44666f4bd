use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BuilderError, BuilderResult};

/// 交付物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveredType {
    Image,
    Slug,
}

impl DeliveredType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveredType::Image => "image",
            DeliveredType::Slug => "slug",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(DeliveredType::Image),
            "slug" => Some(DeliveredType::Slug),
            _ => None,
        }
    }
}

/// 版本最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    Success,
    Failure,
}

impl FinalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalStatus::Success => "success",
            FinalStatus::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(FinalStatus::Success),
            "failure" => Some(FinalStatus::Failure),
            _ => None,
        }
    }
}

/// 组件构建版本记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub component_id: String,
    pub deploy_version: String,
    /// 构建方式，例如 build_from_source_code
    pub kind: String,
    pub delivered_type: Option<DeliveredType>,
    pub delivered_path: String,
    pub image_name: String,
    pub repo_url: String,
    pub code_branch: String,
    pub code_version: String,
    pub commit_msg: String,
    pub author: String,
    pub final_status: Option<FinalStatus>,
    pub finish_time: Option<DateTime<Utc>>,
    pub event_id: String,
    /// 是否仍被组件引用，垃圾回收只清理不再引用的版本
    pub usable: bool,
    pub create_time: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(
        component_id: impl Into<String>,
        deploy_version: impl Into<String>,
        event_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            deploy_version: deploy_version.into(),
            kind: kind.into(),
            delivered_type: None,
            delivered_path: String::new(),
            image_name: String::new(),
            repo_url: String::new(),
            code_branch: String::new(),
            code_version: String::new(),
            commit_msg: String::new(),
            author: String::new(),
            final_status: None,
            finish_time: None,
            event_id: event_id.into(),
            usable: true,
            create_time: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.final_status.is_some()
    }

    /// 标记成功；成功的版本必须有交付物路径和完成时间
    pub fn mark_success(
        &mut self,
        delivered_type: DeliveredType,
        delivered_path: impl Into<String>,
    ) -> BuilderResult<()> {
        let delivered_path = delivered_path.into();
        if delivered_path.is_empty() {
            return Err(BuilderError::internal(format!(
                "版本 {}:{} 交付物路径为空",
                self.component_id, self.deploy_version
            )));
        }
        if delivered_type == DeliveredType::Image {
            self.image_name = delivered_path.clone();
        }
        self.delivered_type = Some(delivered_type);
        self.delivered_path = delivered_path;
        self.final_status = Some(FinalStatus::Success);
        self.finish_time = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failure(&mut self) {
        self.final_status = Some(FinalStatus::Failure);
        self.finish_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_path() {
        let mut record = VersionRecord::new("S", "20230101120000", "E", "build_from_image");
        assert!(record.mark_success(DeliveredType::Image, "").is_err());
        assert!(record.final_status.is_none());

        record
            .mark_success(DeliveredType::Image, "hub.kato.me/s:20230101120000")
            .unwrap();
        assert_eq!(record.final_status, Some(FinalStatus::Success));
        assert!(record.finish_time.is_some());
        assert_eq!(record.image_name, "hub.kato.me/s:20230101120000");
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut record = VersionRecord::new("S", "1", "E", "build_from_source_code");
        assert!(!record.is_terminal());
        record.mark_failure();
        assert!(record.is_terminal());
        assert_eq!(record.final_status, Some(FinalStatus::Failure));
    }
}
