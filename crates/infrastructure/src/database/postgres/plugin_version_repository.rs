use async_trait::async_trait;
use builder_core::models::{PluginBuildStatus, PluginBuildVersion};
use builder_core::{BuilderError, BuilderResult, PluginVersionRepository};
use sqlx::{PgPool, Row};
use tracing::instrument;

pub struct PostgresPluginVersionRepository {
    pool: PgPool,
}

impl PostgresPluginVersionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_version(row: &sqlx::postgres::PgRow) -> BuilderResult<PluginBuildVersion> {
        let status: String = row.try_get("status")?;
        let status = PluginBuildStatus::parse(&status).ok_or_else(|| {
            BuilderError::DatabaseOperation(format!("未知的插件构建状态: {status}"))
        })?;
        Ok(PluginBuildVersion {
            plugin_id: row.try_get("plugin_id")?,
            deploy_version: row.try_get("deploy_version")?,
            build_local_image: row.try_get("build_local_image")?,
            status,
            event_id: row.try_get("event_id")?,
            update_time: row.try_get("update_time")?,
        })
    }
}

#[async_trait]
impl PluginVersionRepository for PostgresPluginVersionRepository {
    #[instrument(skip(self))]
    async fn get(
        &self,
        plugin_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<PluginBuildVersion>> {
        let row = sqlx::query(
            "SELECT plugin_id, deploy_version, build_local_image, status, event_id, update_time \
             FROM tenant_plugin_build_version WHERE plugin_id = $1 AND deploy_version = $2",
        )
        .bind(plugin_id)
        .bind(deploy_version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_version).transpose()
    }

    #[instrument(skip(self, version), fields(
        plugin_id = %version.plugin_id,
        deploy_version = %version.deploy_version,
        status = %version.status.as_str(),
    ))]
    async fn save(&self, version: &PluginBuildVersion) -> BuilderResult<()> {
        sqlx::query(
            "INSERT INTO tenant_plugin_build_version \
             (plugin_id, deploy_version, build_local_image, status, event_id, update_time) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (plugin_id, deploy_version) DO UPDATE SET \
             build_local_image = EXCLUDED.build_local_image, status = EXCLUDED.status, \
             event_id = EXCLUDED.event_id, update_time = EXCLUDED.update_time",
        )
        .bind(&version.plugin_id)
        .bind(&version.deploy_version)
        .bind(&version.build_local_image)
        .bind(version.status.as_str())
        .bind(&version.event_id)
        .bind(version.update_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
