use async_trait::async_trait;

use crate::{config::RegistryCredential, models::ImageRef, BuilderResult};

/// 镜像仓库 V2 接口
///
/// `tags`、`manifest_digest_v2`、`delete_manifest` 作用于平台内部仓库，
/// `exists` 可以查询任意仓库。
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn exists(
        &self,
        image: &ImageRef,
        credential: Option<&RegistryCredential>,
    ) -> BuilderResult<bool>;

    async fn tags(&self, repository: &str) -> BuilderResult<Vec<String>>;

    async fn manifest_digest_v2(&self, repository: &str, tag: &str) -> BuilderResult<String>;

    /// 仓库未开启删除时返回 `RegistryWriteDisabled`
    async fn delete_manifest(&self, repository: &str, digest: &str) -> BuilderResult<()>;
}

/// 可信镜像仓库的仓库管理接口
#[async_trait]
pub trait TrustedRegistry: Send + Sync {
    async fn repository_exists(
        &self,
        domain: &str,
        namespace: &str,
        name: &str,
        credential: &RegistryCredential,
    ) -> BuilderResult<bool>;

    /// 仓库已存在视为成功
    async fn create_repository(
        &self,
        domain: &str,
        namespace: &str,
        name: &str,
        short_description: &str,
        credential: &RegistryCredential,
    ) -> BuilderResult<()>;
}
