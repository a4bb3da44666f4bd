use std::sync::Arc;

use builder_core::config::{MessageQueueConfig, MessageQueueType};
use builder_core::{BuilderResult, TaskQueue};
use tracing::{debug, info};

use crate::{InMemoryTaskQueue, RabbitMqTaskQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(config: &MessageQueueConfig) -> BuilderResult<Arc<dyn TaskQueue>> {
        debug!("创建消息队列，类型: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::Rabbitmq => {
                info!("初始化RabbitMQ任务队列");
                let rabbitmq = RabbitMqTaskQueue::new(config).await?;
                Ok(Arc::new(rabbitmq))
            }
            MessageQueueType::InMemory => {
                info!("使用内存任务队列，仅适用于单进程调试");
                Ok(Arc::new(InMemoryTaskQueue::new()))
            }
        }
    }
}
