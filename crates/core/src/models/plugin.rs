use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginBuildStatus {
    Building,
    Complete,
    Failure,
}

impl PluginBuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginBuildStatus::Building => "building",
            PluginBuildStatus::Complete => "complete",
            PluginBuildStatus::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "building" => Some(PluginBuildStatus::Building),
            "complete" => Some(PluginBuildStatus::Complete),
            "failure" => Some(PluginBuildStatus::Failure),
            _ => None,
        }
    }
}

/// 插件构建版本记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBuildVersion {
    pub plugin_id: String,
    pub deploy_version: String,
    pub build_local_image: String,
    pub status: PluginBuildStatus,
    pub event_id: String,
    pub update_time: DateTime<Utc>,
}

impl PluginBuildVersion {
    pub fn building(
        plugin_id: impl Into<String>,
        deploy_version: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            deploy_version: deploy_version.into(),
            build_local_image: String::new(),
            status: PluginBuildStatus::Building,
            event_id: event_id.into(),
            update_time: Utc::now(),
        }
    }

    pub fn complete(&mut self, image: impl Into<String>) {
        self.build_local_image = image.into();
        self.status = PluginBuildStatus::Complete;
        self.update_time = Utc::now();
    }

    pub fn fail(&mut self) {
        self.status = PluginBuildStatus::Failure;
        self.update_time = Utc::now();
    }
}
