use async_trait::async_trait;
use builder_core::models::{DeliveredType, FinalStatus, VersionRecord};
use builder_core::{BuilderError, BuilderResult, VersionRepository};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const COLUMNS: &str = "component_id, deploy_version, kind, delivered_type, delivered_path, image_name, \
     repo_url, code_branch, code_version, commit_msg, author, final_status, finish_time, event_id, \
     usable, create_time";

pub struct PostgresVersionRepository {
    pool: PgPool,
}

impl PostgresVersionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> BuilderResult<VersionRecord> {
        let delivered_type: Option<String> = row.try_get("delivered_type")?;
        let final_status: Option<String> = row.try_get("final_status")?;
        Ok(VersionRecord {
            component_id: row.try_get("component_id")?,
            deploy_version: row.try_get("deploy_version")?,
            kind: row.try_get("kind")?,
            delivered_type: delivered_type.as_deref().and_then(DeliveredType::parse),
            delivered_path: row.try_get("delivered_path")?,
            image_name: row.try_get("image_name")?,
            repo_url: row.try_get("repo_url")?,
            code_branch: row.try_get("code_branch")?,
            code_version: row.try_get("code_version")?,
            commit_msg: row.try_get("commit_msg")?,
            author: row.try_get("author")?,
            final_status: final_status.as_deref().and_then(FinalStatus::parse),
            finish_time: row.try_get("finish_time")?,
            event_id: row.try_get("event_id")?,
            usable: row.try_get("usable")?,
            create_time: row.try_get("create_time")?,
        })
    }
}

#[async_trait]
impl VersionRepository for PostgresVersionRepository {
    #[instrument(skip(self))]
    async fn get(
        &self,
        component_id: &str,
        deploy_version: &str,
    ) -> BuilderResult<Option<VersionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenant_service_version WHERE component_id = $1 AND deploy_version = $2"
        ))
        .bind(component_id)
        .bind(deploy_version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self, record), fields(
        component_id = %record.component_id,
        deploy_version = %record.deploy_version,
    ))]
    async fn create(&self, record: &VersionRecord) -> BuilderResult<()> {
        sqlx::query(&format!(
            "INSERT INTO tenant_service_version ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (component_id, deploy_version) DO NOTHING"
        ))
        .bind(&record.component_id)
        .bind(&record.deploy_version)
        .bind(&record.kind)
        .bind(record.delivered_type.map(|t| t.as_str()))
        .bind(&record.delivered_path)
        .bind(&record.image_name)
        .bind(&record.repo_url)
        .bind(&record.code_branch)
        .bind(&record.code_version)
        .bind(&record.commit_msg)
        .bind(&record.author)
        .bind(record.final_status.map(|s| s.as_str()))
        .bind(record.finish_time)
        .bind(&record.event_id)
        .bind(record.usable)
        .bind(record.create_time)
        .execute(&self.pool)
        .await?;
        debug!("创建版本记录成功");
        Ok(())
    }

    #[instrument(skip(self, record), fields(
        component_id = %record.component_id,
        deploy_version = %record.deploy_version,
        final_status = ?record.final_status,
    ))]
    async fn update(&self, record: &VersionRecord) -> BuilderResult<()> {
        let result = sqlx::query(
            "UPDATE tenant_service_version SET kind = $3, delivered_type = $4, delivered_path = $5, \
             image_name = $6, repo_url = $7, code_branch = $8, code_version = $9, commit_msg = $10, \
             author = $11, final_status = $12, finish_time = $13, event_id = $14, usable = $15 \
             WHERE component_id = $1 AND deploy_version = $2",
        )
        .bind(&record.component_id)
        .bind(&record.deploy_version)
        .bind(&record.kind)
        .bind(record.delivered_type.map(|t| t.as_str()))
        .bind(&record.delivered_path)
        .bind(&record.image_name)
        .bind(&record.repo_url)
        .bind(&record.code_branch)
        .bind(&record.code_version)
        .bind(&record.commit_msg)
        .bind(&record.author)
        .bind(record.final_status.map(|s| s.as_str()))
        .bind(record.finish_time)
        .bind(&record.event_id)
        .bind(record.usable)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BuilderError::DatabaseOperation(format!(
                "版本记录 {}:{} 不存在",
                record.component_id, record.deploy_version
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_by_component(&self, component_id: &str) -> BuilderResult<Vec<VersionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM tenant_service_version WHERE component_id = $1 ORDER BY create_time DESC"
        ))
        .bind(component_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self))]
    async fn list_usable_versions(&self, component_id: &str) -> BuilderResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT deploy_version FROM tenant_service_version WHERE component_id = $1 AND usable",
        )
        .bind(component_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("deploy_version").map_err(BuilderError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn list_component_ids(&self) -> BuilderResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT component_id FROM tenant_service_version ORDER BY component_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("component_id").map_err(BuilderError::from))
            .collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, component_id: &str, deploy_version: &str) -> BuilderResult<()> {
        sqlx::query(
            "DELETE FROM tenant_service_version WHERE component_id = $1 AND deploy_version = $2",
        )
        .bind(component_id)
        .bind(deploy_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
