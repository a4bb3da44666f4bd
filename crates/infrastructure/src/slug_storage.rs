use std::path::{Path, PathBuf};

use async_trait::async_trait;
use builder_core::{BuilderError, BuilderResult, SlugStorage};
use tracing::{debug, instrument};

/// 共享文件系统上的 slug 存储
///
/// 路径为绝对路径时直接使用，否则相对于 `root`。
#[derive(Debug, Clone)]
pub struct LocalSlugStorage {
    root: PathBuf,
}

impl LocalSlugStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> BuilderResult<PathBuf> {
        let path = path.strip_prefix("file://").unwrap_or(path);
        if path.is_empty() {
            return Err(BuilderError::invalid_params("slug 路径不能为空"));
        }
        if path.contains("://") {
            return Err(BuilderError::invalid_params(format!(
                "不支持的 slug 地址: {path}"
            )));
        }
        let path = Path::new(path);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }

    async fn copy(from: &Path, to: &Path) -> BuilderResult<()> {
        if !tokio::fs::try_exists(from).await? {
            return Err(BuilderError::internal(format!(
                "slug 文件不存在: {}",
                from.display()
            )));
        }
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(from, to).await?;
        debug!("复制 slug {} -> {}", from.display(), to.display());
        Ok(())
    }
}

#[async_trait]
impl SlugStorage for LocalSlugStorage {
    #[instrument(skip(self))]
    async fn fetch(&self, source: &str, dest: &Path) -> BuilderResult<()> {
        let source = self.resolve(source)?;
        Self::copy(&source, dest).await
    }

    #[instrument(skip(self))]
    async fn upload(&self, source: &Path, dest: &str) -> BuilderResult<()> {
        let dest = self.resolve(dest)?;
        Self::copy(source, &dest).await
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> BuilderResult<()> {
        let path = self.resolve(path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_fetch_remove() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalSlugStorage::new(root.path());
        let local = root.path().join("local.tgz");
        std::fs::write(&local, b"slug").unwrap();

        storage.upload(&local, "share/app/1.tgz").await.unwrap();
        assert!(root.path().join("share/app/1.tgz").is_file());

        let fetched = root.path().join("out/fetched.tgz");
        storage.fetch("share/app/1.tgz", &fetched).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), b"slug");

        storage.remove("share/app/1.tgz").await.unwrap();
        storage.remove("share/app/1.tgz").await.unwrap();
        assert!(!root.path().join("share/app/1.tgz").exists());
    }

    #[tokio::test]
    async fn test_rejects_remote_urls() {
        let storage = LocalSlugStorage::new("/tmp");
        let err = storage
            .fetch("ftp://market/slug.tgz", Path::new("/tmp/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidTaskParams(_)));
    }
}
