//! Redis 键值存储与事件日志集成测试

use std::time::Duration;

use anyhow::Result;
use builder_core::config::KvStoreConfig;
use builder_core::{KeyValueStore, LogStatus, LoggerFactory};
use builder_infrastructure::event_log::{
    event_instance_key, event_stream_key, EVENT_INSTANCE_PREFIX,
};
use builder_infrastructure::{RedisKeyValueStore, RedisLoggerFactory};
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;
use tokio::time::sleep;
use tracing::Level;

struct RedisTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    store: RedisKeyValueStore,
}

impl RedisTestContainer {
    async fn new() -> Result<Self> {
        let container = Redis::default().with_tag("7-alpine").start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        let config = KvStoreConfig {
            url: format!("redis://localhost:{port}"),
            ..Default::default()
        };

        let mut retry_count = 0;
        let store = loop {
            match RedisKeyValueStore::new(&config).await {
                Ok(store) => break store,
                Err(_) if retry_count < 30 => {
                    retry_count += 1;
                    sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(Self { container, store })
    }
}

#[tokio::test]
async fn test_put_get_delete() -> Result<()> {
    let kv = RedisTestContainer::new().await?;
    let store = &kv.store;

    assert!(store.get("/kato/shareresult/s1").await?.is_none());

    store.put("/kato/shareresult/s1", r#"{"status":"pushing"}"#).await?;
    store.put("/kato/shareresult/s1", r#"{"status":"success"}"#).await?;
    assert_eq!(
        store.get("/kato/shareresult/s1").await?.as_deref(),
        Some(r#"{"status":"success"}"#)
    );

    store.delete("/kato/shareresult/s1").await?;
    assert!(store.get("/kato/shareresult/s1").await?.is_none());
    // 删除不存在的键不报错
    store.delete("/kato/shareresult/s1").await?;
    Ok(())
}

#[tokio::test]
async fn test_list_prefix_is_sorted_and_literal() -> Result<()> {
    let kv = RedisTestContainer::new().await?;
    let store = &kv.store;

    store.put("/kato/servicecheck/c", "3").await?;
    store.put("/kato/servicecheck/a", "1").await?;
    store.put("/kato/servicecheck/b", "2").await?;
    store.put("/kato/shareresult/a", "x").await?;
    store.put("/kato/service", "y").await?;

    let listed = store.list_prefix("/kato/servicecheck/").await?;
    assert_eq!(
        listed,
        vec![
            ("/kato/servicecheck/a".to_string(), "1".to_string()),
            ("/kato/servicecheck/b".to_string(), "2".to_string()),
            ("/kato/servicecheck/c".to_string(), "3".to_string()),
        ]
    );

    // glob 字符按字面匹配
    store.put("/kato/x*y/1", "star").await?;
    store.put("/kato/xzy/1", "plain").await?;
    let listed = store.list_prefix("/kato/x*y/").await?;
    assert_eq!(listed, vec![("/kato/x*y/1".to_string(), "star".to_string())]);

    assert!(store.list_prefix("/nothing/").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_event_logger_registers_instance_until_closed() -> Result<()> {
    let kv = RedisTestContainer::new().await?;
    let store = &kv.store;
    let factory = RedisLoggerFactory::new(store.connection());

    let logger = factory.for_event("e1");
    assert!(store.list_prefix(EVENT_INSTANCE_PREFIX).await?.is_empty());

    logger
        .log(Level::INFO, "开始构建", "build-start", LogStatus::Starting)
        .await;
    logger
        .log(Level::INFO, "构建完成", "build-end", LogStatus::Success)
        .await;

    let instances = store.list_prefix(EVENT_INSTANCE_PREFIX).await?;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].0, event_instance_key("e1"));
    assert!(!instances[0].1.is_empty());

    let mut conn = store.connection();
    let entries: i64 = redis::cmd("XLEN")
        .arg(event_stream_key("e1"))
        .query_async(&mut conn)
        .await?;
    assert_eq!(entries, 2);

    logger.close().await;
    assert!(store.list_prefix(EVENT_INSTANCE_PREFIX).await?.is_empty());

    // 关闭后的日志不再写入
    logger
        .log(Level::INFO, "迟到的日志", "build-end", LogStatus::None)
        .await;
    let entries: i64 = redis::cmd("XLEN")
        .arg(event_stream_key("e1"))
        .query_async(&mut conn)
        .await?;
    assert_eq!(entries, 2);
    assert!(store.get(&event_instance_key("e1")).await?.is_none());
    Ok(())
}
