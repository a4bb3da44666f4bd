use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::MessageQueueConfig;
use builder_core::models::Task;
use builder_core::{BuilderError, BuilderResult, TaskQueue};
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// RabbitMQ 任务队列实现
///
/// 每个主题对应一个持久化队列。出队使用 `basic_get` 轮询，直到取到任务或超时。
pub struct RabbitMqTaskQueue {
    connection: Connection,
    channel: Mutex<Channel>,
    declared: Mutex<HashSet<String>>,
    poll_interval: Duration,
    closed: AtomicBool,
}

impl RabbitMqTaskQueue {
    /// 连接 RabbitMQ
    pub async fn new(config: &MessageQueueConfig) -> BuilderResult<Self> {
        let connect = Connection::connect(&config.url, ConnectionProperties::default());
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            connect,
        )
        .await
        .map_err(|_| BuilderError::MessageQueue("连接RabbitMQ超时".to_string()))?
        .map_err(|e| BuilderError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("创建通道失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            declared: Mutex::new(HashSet::new()),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            closed: AtomicBool::new(false),
        })
    }

    /// 声明主题对应的队列，每个主题只声明一次
    async fn ensure_queue(&self, channel: &Channel, topic: &str) -> BuilderResult<()> {
        let mut declared = self.declared.lock().await;
        if declared.contains(topic) {
            return Ok(());
        }
        channel
            .queue_declare(
                topic,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("声明队列 {topic} 失败: {e}")))?;
        declared.insert(topic.to_string());
        debug!("队列 {} 声明成功", topic);
        Ok(())
    }

    fn check_connected(&self) -> BuilderResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BuilderError::Cancelled);
        }
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(BuilderError::NoConnection)
        }
    }

    /// 取一条消息，队列为空返回 None
    async fn try_get(&self, topic: &str) -> BuilderResult<Option<Task>> {
        self.check_connected()?;
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, topic).await?;

        let delivery = channel
            .basic_get(topic, BasicGetOptions::default())
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("从队列 {topic} 获取消息失败: {e}")))?;
        let Some(delivery) = delivery else {
            return Ok(None);
        };

        channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("确认消息失败: {e}")))?;

        match Task::deserialize_bytes(&delivery.data) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                // 无法解析的消息已确认丢弃，避免反复投递
                warn!(topic, error = %e, "丢弃无法解析的任务消息");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TaskQueue for RabbitMqTaskQueue {
    #[instrument(skip(self), fields(topic = %topic))]
    async fn dequeue(
        &self,
        topic: &str,
        client_host: &str,
        timeout: Duration,
    ) -> BuilderResult<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_get(topic).await? {
                debug!(task_id = %task.task_id, client_host, "取到任务");
                return Ok(task);
            }
            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(BuilderError::DeadlineExceeded);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    #[instrument(skip(self, task), fields(topic = %topic, task_id = %task.task_id))]
    async fn enqueue(&self, topic: &str, task: &Task) -> BuilderResult<()> {
        self.check_connected()?;
        let payload = task.serialize_bytes()?;
        let channel = self.channel.lock().await;
        self.ensure_queue(&channel, topic).await?;

        let confirm = channel
            .basic_publish(
                "",
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("发布消息到队列 {topic} 失败: {e}")))?;
        confirm
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("消息发布确认失败: {e}")))?;

        debug!("任务已发布到队列: {}", topic);
        Ok(())
    }

    async fn close(&self) -> BuilderResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) || !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| BuilderError::MessageQueue(format!("关闭连接失败: {e}")))?;
        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}
