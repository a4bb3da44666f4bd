use async_trait::async_trait;
use serde::Serialize;

use crate::BuilderResult;

/// 键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> BuilderResult<()>;

    async fn get(&self, key: &str) -> BuilderResult<Option<String>>;

    /// 按前缀列出键值对，按键排序
    async fn list_prefix(&self, prefix: &str) -> BuilderResult<Vec<(String, String)>>;

    async fn delete(&self, key: &str) -> BuilderResult<()>;
}

/// 以 JSON 形式写入
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> BuilderResult<()> {
    let body = serde_json::to_string(value)?;
    store.put(key, &body).await
}
