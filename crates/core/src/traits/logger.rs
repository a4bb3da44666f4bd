use std::sync::Arc;

use async_trait::async_trait;
use tracing::Level;

/// 构建日志中每条消息附带的阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    None,
    Starting,
    Success,
    Failure,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::None => "",
            LogStatus::Starting => "starting",
            LogStatus::Success => "success",
            LogStatus::Failure => "failure",
        }
    }
}

/// 面向用户的构建日志，按事件 ID 汇集
#[async_trait]
pub trait BuildLogger: Send + Sync {
    fn event_id(&self) -> &str;

    async fn log(&self, level: Level, message: &str, step: &str, status: LogStatus);

    async fn info(&self, message: &str, step: &str, status: LogStatus) {
        self.log(Level::INFO, message, step, status).await
    }

    async fn error(&self, message: &str, step: &str, status: LogStatus) {
        self.log(Level::ERROR, message, step, status).await
    }

    async fn debug(&self, message: &str, step: &str, status: LogStatus) {
        self.log(Level::DEBUG, message, step, status).await
    }

    /// 结束事件，之后不再写入
    async fn close(&self);
}

/// 为每个事件创建构建日志
pub trait LoggerFactory: Send + Sync {
    fn for_event(&self, event_id: &str) -> Arc<dyn BuildLogger>;
}
