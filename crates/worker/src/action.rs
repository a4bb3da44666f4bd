//! 构建成功后向下游发送的动作

use builder_core::models::Task;
use builder_core::{BuilderResult, TaskQueue};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const ROLLING_UPGRADE: &str = "rolling_upgrade";

/// 只构建不升级
pub const ACTION_BUILD: &str = "build";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeAction {
    pub tenant_id: String,
    pub service_id: String,
    pub deploy_version: String,
    pub event_id: String,
}

/// 按任务的 `action` 决定是否发送滚动升级，空值视为 upgrade
pub async fn send_action(
    queue: &dyn TaskQueue,
    topic: &str,
    action: &str,
    upgrade: UpgradeAction,
) -> BuilderResult<()> {
    if action == ACTION_BUILD {
        return Ok(());
    }
    let task = Task::new(ROLLING_UPGRADE, serde_json::to_value(&upgrade)?);
    queue.enqueue(topic, &task).await?;
    info!(
        service_id = %upgrade.service_id,
        deploy_version = %upgrade.deploy_version,
        topic,
        "已发送滚动升级任务"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use builder_testing_utils::MockTaskQueue;

    fn upgrade() -> UpgradeAction {
        UpgradeAction {
            tenant_id: "T".to_string(),
            service_id: "S".to_string(),
            deploy_version: "1".to_string(),
            event_id: "E".to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_only_sends_nothing() {
        let queue = MockTaskQueue::new();
        send_action(&queue, "worker", "build", upgrade()).await.unwrap();
        assert!(queue.published("worker").is_empty());
    }

    #[tokio::test]
    async fn test_default_action_upgrades() {
        let queue = MockTaskQueue::new();
        send_action(&queue, "worker", "", upgrade()).await.unwrap();
        let published = queue.published("worker");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].task_type, ROLLING_UPGRADE);
        assert_eq!(published[0].body["service_id"], "S");
    }
}
