use std::path::Path;

use async_trait::async_trait;

use crate::BuilderResult;

/// slug 文件的存取
#[async_trait]
pub trait SlugStorage: Send + Sync {
    /// 把 `source` 指向的 slug 取到本地 `dest`
    async fn fetch(&self, source: &str, dest: &Path) -> BuilderResult<()>;

    /// 把本地 slug 上传到 `dest`
    async fn upload(&self, source: &Path, dest: &str) -> BuilderResult<()>;

    async fn remove(&self, path: &str) -> BuilderResult<()>;
}
