use std::time::Duration;

use async_trait::async_trait;

use crate::{models::Task, BuilderResult};

/// 任务消息队列（消费端）
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 从主题取出一个任务
    ///
    /// 在 `timeout` 内没有任务时返回 `DeadlineExceeded`，队列关闭后返回 `Cancelled`，
    /// 连接不可用时返回 `NoConnection`
    async fn dequeue(&self, topic: &str, client_host: &str, timeout: Duration)
        -> BuilderResult<Task>;

    /// 投递任务到主题
    async fn enqueue(&self, topic: &str, task: &Task) -> BuilderResult<()>;

    /// 关闭连接，之后的出队返回 `Cancelled`
    async fn close(&self) -> BuilderResult<()> {
        Ok(())
    }
}
