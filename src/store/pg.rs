use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{check_size, SnapshotStore, StoreError, MAX_SNAPSHOT_BYTES};

/// Snapshots kept in a single Postgres table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    max_bytes: usize,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;

        // Verify connectivity
        sqlx::query("SELECT 1").execute(&pool).await?;

        let store = Self {
            pool,
            max_bytes: MAX_SNAPSHOT_BYTES,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracker_snapshots (
                key TEXT PRIMARY KEY,
                payload BYTEA NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT payload FROM tracker_snapshots WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(payload,)| payload))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        check_size(key, bytes.len(), self.max_bytes)?;
        sqlx::query(
            r#"
            INSERT INTO tracker_snapshots (key, payload, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET payload = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
