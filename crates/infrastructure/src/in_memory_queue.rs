use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use builder_core::models::Task;
use builder_core::{BuilderError, BuilderResult, TaskQueue};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// 内存任务队列
///
/// 单进程调试时替代 RabbitMQ，按主题保存先进先出的任务。
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskQueue {
    topics: Arc<Mutex<HashMap<String, VecDeque<Task>>>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主题中等待出队的任务数
    pub async fn len(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    async fn pop(&self, topic: &str) -> Option<Task> {
        self.topics
            .lock()
            .await
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn dequeue(
        &self,
        topic: &str,
        _client_host: &str,
        timeout: Duration,
    ) -> BuilderResult<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(BuilderError::Cancelled);
            }
            // 先注册通知再检查队列，避免错过入队信号
            let notified = self.notify.notified();
            if let Some(task) = self.pop(topic).await {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BuilderError::DeadlineExceeded);
            }
        }
    }

    async fn enqueue(&self, topic: &str, task: &Task) -> BuilderResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BuilderError::Cancelled);
        }
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .push_back(task.clone());
        debug!(topic, task_id = %task.task_id, "任务已写入内存队列");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> BuilderResult<()> {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        Ok(())
    }
}
