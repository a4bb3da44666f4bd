//! 数据仓储层接口
//!
//! 构建服务只读写三类记录：组件构建版本、插件构建版本，以及组件的删除标记。

use async_trait::async_trait;

use crate::{
    models::{PluginBuildVersion, VersionRecord},
    BuilderResult,
};

/// 组件构建版本仓储
#[async_trait]
pub trait VersionRepository: Send + Sync {
    async fn get(
        &self,
        component_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<VersionRecord>>;

    async fn create(&self, record: &VersionRecord) -> BuilderResult<()>;

    async fn update(&self, record: &VersionRecord) -> BuilderResult<()>;

    /// 组件的全部版本，按创建时间从新到旧排列
    async fn list_by_component(&self, component_id: &str) -> BuilderResult<Vec<VersionRecord>>;

    /// 组件仍被引用的版本号
    async fn list_usable_versions(&self, component_id: &str) -> BuilderResult<Vec<String>>;

    /// 拥有版本记录的组件
    async fn list_component_ids(&self) -> BuilderResult<Vec<String>>;

    async fn delete(&self, component_id: &str, deploy_version: &str) -> BuilderResult<()>;

    /// 查询版本，不存在时创建
    async fn get_or_create(&self, record: VersionRecord) -> BuilderResult<VersionRecord> {
        if let Some(existing) = self
            .get(&record.component_id, &record.deploy_version)
            .await?
        {
            return Ok(existing);
        }
        self.create(&record).await?;
        Ok(record)
    }
}

/// 组件仓储，垃圾回收用来区分已删除和仍在使用的组件
#[async_trait]
pub trait ComponentRepository: Send + Sync {
    async fn list_deleted_components(&self) -> BuilderResult<Vec<String>>;

    async fn list_live_components(&self) -> BuilderResult<Vec<String>>;
}

/// 插件构建版本仓储
#[async_trait]
pub trait PluginVersionRepository: Send + Sync {
    async fn get(
        &self,
        plugin_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<PluginBuildVersion>>;

    /// 插入或更新
    async fn save(&self, version: &PluginBuildVersion) -> BuilderResult<()>;
}
