use async_trait::async_trait;
use builder_core::{BuilderError, BuilderResult, ComponentRepository};
use sqlx::{PgPool, Row};
use tracing::instrument;

pub struct PostgresComponentRepository {
    pool: PgPool,
}

impl PostgresComponentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ids(&self, sql: &str) -> BuilderResult<Vec<String>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get("service_id").map_err(BuilderError::from))
            .collect()
    }
}

#[async_trait]
impl ComponentRepository for PostgresComponentRepository {
    #[instrument(skip(self))]
    async fn list_deleted_components(&self) -> BuilderResult<Vec<String>> {
        self.ids("SELECT service_id FROM tenant_services_delete ORDER BY service_id")
            .await
    }

    #[instrument(skip(self))]
    async fn list_live_components(&self) -> BuilderResult<Vec<String>> {
        self.ids(
            "SELECT service_id FROM tenant_services s \
             WHERE NOT EXISTS (SELECT 1 FROM tenant_services_delete d WHERE d.service_id = s.service_id) \
             ORDER BY service_id",
        )
        .await
    }
}
