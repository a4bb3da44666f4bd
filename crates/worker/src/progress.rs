//! 任务进度事件
//!
//! 引擎与工作器之间只通过进度通道通信，工作器不持有引擎的引用。

use builder_core::models::Task;
use tokio::sync::broadcast;

/// 单个任务经历的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    Accepted,
    Running,
    /// 工作器内部的阶段性进展
    Step,
    Succeeded,
    Failed,
    /// 引擎停止时退回消息队列
    Returned,
}

impl TaskStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStage::Succeeded | TaskStage::Failed | TaskStage::Returned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub task_id: String,
    pub task_type: String,
    pub stage: TaskStage,
    pub detail: String,
}

/// 绑定到单个任务的进度发送端
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: String,
    task_type: String,
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(task: &Task, sender: broadcast::Sender<ProgressEvent>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            task_type: task.task_type.clone(),
            sender,
        }
    }

    /// 不关心进度时使用
    pub fn detached(task: &Task) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(task, sender)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn report(&self, stage: TaskStage, detail: impl Into<String>) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.sender.send(ProgressEvent {
            task_id: self.task_id.clone(),
            task_type: self.task_type.clone(),
            stage,
            detail: detail.into(),
        });
    }

    pub fn step(&self, detail: impl Into<String>) {
        self.report(TaskStage::Step, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reporter_tags_events_with_task() {
        let (sender, mut receiver) = broadcast::channel(4);
        let task = Task::new("share-slug", json!({}));
        let reporter = ProgressReporter::new(&task, sender);
        reporter.step("上传 slug");

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.task_id, task.task_id);
        assert_eq!(event.task_type, "share-slug");
        assert_eq!(event.stage, TaskStage::Step);
        assert!(!event.stage.is_terminal());
    }

    #[test]
    fn test_detached_reporter_does_not_fail() {
        let task = Task::new("export_app", json!({}));
        ProgressReporter::detached(&task).report(TaskStage::Succeeded, "");
    }
}
