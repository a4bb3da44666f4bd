use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务执行引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent: usize,
    /// 消费的任务主题，Windows 构建节点配置为 `windows_builder`
    pub topic: String,
    /// 升级动作发送的目标主题
    pub worker_topic: String,
    pub dequeue_timeout_seconds: u64,
    pub overload_backoff_seconds: u64,
    /// 出队时上报的客户端标识，为空时使用主机名
    pub client_host: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            topic: "builder".to_string(),
            worker_topic: "worker".to_string(),
            dequeue_timeout_seconds: 5,
            overload_backoff_seconds: 2,
            client_host: String::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }
        if self.topic.is_empty() {
            return Err(anyhow::anyhow!("任务主题不能为空"));
        }
        if self.worker_topic.is_empty() {
            return Err(anyhow::anyhow!("Worker主题不能为空"));
        }
        if self.dequeue_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("出队超时时间必须大于0"));
        }
        if self.overload_backoff_seconds == 0 {
            return Err(anyhow::anyhow!("满载等待间隔必须大于0"));
        }
        Ok(())
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_seconds)
    }

    pub fn overload_backoff(&self) -> Duration {
        Duration::from_secs(self.overload_backoff_seconds)
    }
}
