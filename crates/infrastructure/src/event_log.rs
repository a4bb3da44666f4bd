//! 构建事件日志
//!
//! 每个事件的日志追加到 Redis 流 `eventlog:<event_id>`，前端按事件 ID 订阅。
//! 正在写入的事件登记在 `/event/instance/<event_id>`，值为写入节点的主机名。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use builder_core::logging::TracingBuildLogger;
use builder_core::{BuildLogger, LogStatus, LoggerFactory};
use chrono::Utc;
use redis::aio::ConnectionManager;
use tracing::{warn, Level};

/// 事件流保留时长
const STREAM_TTL_SECONDS: i64 = 7 * 24 * 3600;

pub const EVENT_INSTANCE_PREFIX: &str = "/event/instance/";

pub fn event_stream_key(event_id: &str) -> String {
    format!("eventlog:{event_id}")
}

pub fn event_instance_key(event_id: &str) -> String {
    format!("{EVENT_INSTANCE_PREFIX}{event_id}")
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        _ => "debug",
    }
}

pub struct RedisEventLogger {
    event_id: String,
    instance: String,
    conn: ConnectionManager,
    registered: AtomicBool,
    closed: AtomicBool,
    mirror: TracingBuildLogger,
}

impl RedisEventLogger {
    pub fn new(
        event_id: impl Into<String>,
        instance: impl Into<String>,
        conn: ConnectionManager,
    ) -> Self {
        let event_id = event_id.into();
        Self {
            mirror: TracingBuildLogger::new(event_id.clone()),
            event_id,
            instance: instance.into(),
            conn,
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    async fn register(&self) -> redis::RedisResult<()> {
        if self.registered.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(event_instance_key(&self.event_id))
            .arg(&self.instance)
            .query_async(&mut conn)
            .await
    }

    async fn append(
        &self,
        level: Level,
        message: &str,
        step: &str,
        status: LogStatus,
    ) -> redis::RedisResult<()> {
        self.register().await?;
        let key = event_stream_key(&self.event_id);
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(&key)
            .arg("*")
            .arg("level")
            .arg(level_name(level))
            .arg("message")
            .arg(message)
            .arg("step")
            .arg(step)
            .arg("status")
            .arg(status.as_str())
            .arg("time")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(STREAM_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BuildLogger for RedisEventLogger {
    fn event_id(&self) -> &str {
        &self.event_id
    }

    async fn log(&self, level: Level, message: &str, step: &str, status: LogStatus) {
        self.mirror.log(level, message, step, status).await;
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.append(level, message, step, status).await {
            warn!(event_id = %self.event_id, error = %e, "写入事件日志失败");
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) || !self.registered.load(Ordering::Acquire) {
            return;
        }
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("DEL")
            .arg(event_instance_key(&self.event_id))
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(event_id = %self.event_id, error = %e, "注销事件日志实例失败");
        }
    }
}

/// 为每个事件创建写入 Redis 的构建日志
#[derive(Clone)]
pub struct RedisLoggerFactory {
    conn: ConnectionManager,
    instance: String,
}

impl RedisLoggerFactory {
    pub fn new(conn: ConnectionManager) -> Self {
        let instance = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self { conn, instance }
    }
}

impl LoggerFactory for RedisLoggerFactory {
    fn for_event(&self, event_id: &str) -> Arc<dyn BuildLogger> {
        Arc::new(RedisEventLogger::new(
            event_id,
            self.instance.clone(),
            self.conn.clone(),
        ))
    }
}

/// 只写进程日志
#[derive(Debug, Clone, Default)]
pub struct TracingLoggerFactory;

impl LoggerFactory for TracingLoggerFactory {
    fn for_event(&self, event_id: &str) -> Arc<dyn BuildLogger> {
        Arc::new(TracingBuildLogger::new(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(event_stream_key("e1"), "eventlog:e1");
        assert_eq!(event_instance_key("e1"), "/event/instance/e1");
        assert_eq!(level_name(Level::TRACE), "debug");
    }

    #[tokio::test]
    async fn test_tracing_factory_keeps_event_id() {
        let logger = TracingLoggerFactory.for_event("event-9");
        assert_eq!(logger.event_id(), "event-9");
        logger.info("hello", "step", LogStatus::None).await;
        logger.close().await;
    }
}
