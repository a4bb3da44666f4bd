use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BuilderError, BuilderResult};

/// 消息队列中的任务信封，出队后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Task {
    pub fn new(task_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            created_at: Utc::now(),
            body,
        }
    }

    /// 解析任务类型，未知类型返回 `UnknownTaskType`
    pub fn kind(&self) -> BuilderResult<TaskType> {
        self.task_type.parse()
    }

    /// 按任务类型反序列化任务体
    pub fn parse_body<T: DeserializeOwned>(&self) -> BuilderResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            BuilderError::InvalidTaskParams(format!(
                "解析任务 {} ({}) 参数失败: {e}",
                self.task_id, self.task_type
            ))
        })
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// 构建服务支持的任务类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "build_from_image")]
    BuildFromImage,
    #[serde(rename = "build_from_source_code")]
    BuildFromSourceCode,
    #[serde(rename = "build_from_market_slug")]
    BuildFromMarketSlug,
    #[serde(rename = "service_check")]
    ServiceCheck,
    #[serde(rename = "plugin_image_build")]
    PluginImageBuild,
    #[serde(rename = "plugin_dockerfile_build")]
    PluginDockerfileBuild,
    #[serde(rename = "share-image")]
    ShareImage,
    #[serde(rename = "share-plugin")]
    SharePlugin,
    #[serde(rename = "share-slug")]
    ShareSlug,
    #[serde(rename = "export_app")]
    ExportApp,
    #[serde(rename = "import_app")]
    ImportApp,
    #[serde(rename = "garbage-collection")]
    GarbageCollection,
}

impl TaskType {
    pub const ALL: [TaskType; 12] = [
        TaskType::BuildFromImage,
        TaskType::BuildFromSourceCode,
        TaskType::BuildFromMarketSlug,
        TaskType::ServiceCheck,
        TaskType::PluginImageBuild,
        TaskType::PluginDockerfileBuild,
        TaskType::ShareImage,
        TaskType::SharePlugin,
        TaskType::ShareSlug,
        TaskType::ExportApp,
        TaskType::ImportApp,
        TaskType::GarbageCollection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::BuildFromImage => "build_from_image",
            TaskType::BuildFromSourceCode => "build_from_source_code",
            TaskType::BuildFromMarketSlug => "build_from_market_slug",
            TaskType::ServiceCheck => "service_check",
            TaskType::PluginImageBuild => "plugin_image_build",
            TaskType::PluginDockerfileBuild => "plugin_dockerfile_build",
            TaskType::ShareImage => "share-image",
            TaskType::SharePlugin => "share-plugin",
            TaskType::ShareSlug => "share-slug",
            TaskType::ExportApp => "export_app",
            TaskType::ImportApp => "import_app",
            TaskType::GarbageCollection => "garbage-collection",
        }
    }

    /// 受并发控制的任务在整个执行期间占用槽位，其余任务启动后立即释放
    pub fn is_concurrency_controlled(&self) -> bool {
        matches!(
            self,
            TaskType::BuildFromSourceCode
                | TaskType::ServiceCheck
                | TaskType::PluginDockerfileBuild
        )
    }

    /// 内部操作失败后的重试次数
    pub fn max_retries(&self) -> u32 {
        match self {
            TaskType::BuildFromImage
            | TaskType::BuildFromMarketSlug
            | TaskType::ShareImage
            | TaskType::SharePlugin
            | TaskType::ShareSlug => 2,
            _ => 0,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BuilderError::UnknownTaskType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_type_round_trip_names() {
        for task_type in TaskType::ALL {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
            let encoded = serde_json::to_value(task_type).unwrap();
            assert_eq!(encoded, json!(task_type.as_str()));
        }
    }

    #[test]
    fn test_unknown_task_type() {
        let err = "rolling_upgrade".parse::<TaskType>().unwrap_err();
        assert!(matches!(err, BuilderError::UnknownTaskType(ref t) if t == "rolling_upgrade"));
    }

    #[test]
    fn test_concurrency_classes() {
        let controlled: Vec<_> = TaskType::ALL
            .iter()
            .filter(|t| t.is_concurrency_controlled())
            .collect();
        assert_eq!(
            controlled,
            vec![
                &TaskType::BuildFromSourceCode,
                &TaskType::ServiceCheck,
                &TaskType::PluginDockerfileBuild
            ]
        );
        assert_eq!(TaskType::BuildFromSourceCode.max_retries(), 0);
        assert_eq!(TaskType::ShareImage.max_retries(), 2);
    }

    #[test]
    fn test_task_wire_format() {
        let task = Task::new("service_check", json!({"check_uuid": "c1"}));
        let bytes = task.serialize_bytes().unwrap();
        let decoded = Task::deserialize_bytes(&bytes).unwrap();
        assert_eq!(decoded, task);
        assert_eq!(decoded.kind().unwrap(), TaskType::ServiceCheck);
    }
}
