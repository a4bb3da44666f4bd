use std::time::Duration;

use async_trait::async_trait;
use builder_core::config::KvStoreConfig;
use builder_core::{BuilderError, BuilderResult, KeyValueStore};
use redis::aio::ConnectionManager;
use tracing::{debug, info, instrument};

pub(crate) fn redis_error(e: redis::RedisError) -> BuilderError {
    BuilderError::KvStore(e.to_string())
}

/// 打开 Redis 连接管理器，超时返回错误
pub(crate) async fn connect(url: &str, timeout: Duration) -> BuilderResult<ConnectionManager> {
    let client = redis::Client::open(url).map_err(redis_error)?;
    let mut conn = tokio::time::timeout(timeout, client.get_connection_manager())
        .await
        .map_err(|_| BuilderError::KvStore("连接Redis超时".to_string()))?
        .map_err(redis_error)?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(redis_error)?;
    Ok(conn)
}

/// 基于 Redis 的键值存储
///
/// 键原样写入，不附加前缀。前缀扫描使用 `SCAN MATCH`，结果按键排序。
#[derive(Clone)]
pub struct RedisKeyValueStore {
    conn: ConnectionManager,
}

impl RedisKeyValueStore {
    pub async fn new(config: &KvStoreConfig) -> BuilderResult<Self> {
        let conn = connect(
            &config.url,
            Duration::from_secs(config.connection_timeout_seconds),
        )
        .await?;
        info!("成功连接到Redis键值存储");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// 共享同一连接，供事件日志使用
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn scan_keys(&self, pattern: &str) -> BuilderResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// 转义 glob 特殊字符，使前缀按字面匹配
fn escape_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    #[instrument(skip(self, value))]
    async fn put(&self, key: &str, value: &str) -> BuilderResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        debug!("写入键 {}", key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> BuilderResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)
    }

    #[instrument(skip(self))]
    async fn list_prefix(&self, prefix: &str) -> BuilderResult<Vec<(String, String)>> {
        let keys = self.scan_keys(&escape_pattern(prefix)).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        // 扫描与读取之间被删除的键直接跳过
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> BuilderResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}
