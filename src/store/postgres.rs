/// PostgreSQL backend for the processed-post store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::{ProcessedRecord, ProcessedStore};
use crate::error::StoreError;

pub struct PgProcessedStore {
    db_pool: PgPool,
    table: String,
}

impl PgProcessedStore {
    /// Connect to `database_url`. The table name is interpolated into SQL, so
    /// it is restricted to identifier characters.
    pub async fn connect(database_url: &str, table: &str) -> Result<Self, StoreError> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::Database(format!(
                "invalid table name: {:?}",
                table
            )));
        }

        // Connection poolers (pgBouncer) need a plain session setup
        let use_pooler = database_url.contains(":6543") || database_url.contains("pgbouncer=true");

        let mut pool_options = sqlx::postgres::PgPoolOptions::new().max_connections(5);

        if use_pooler {
            log::info!("Using connection pooler - disabling statement timeout");
            pool_options = pool_options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET statement_timeout = 0")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            });
        }

        let db_pool = pool_options.connect(database_url).await?;

        Ok(Self {
            db_pool,
            table: table.to_string(),
        })
    }

    /// Create the table if it doesn't exist
    pub async fn initialize(&self) -> Result<(), StoreError> {
        log::info!("Initializing processed-post table {}...", self.table);

        let create_table_query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                post_id TEXT PRIMARY KEY,
                processed_at TIMESTAMPTZ NOT NULL,
                source_text TEXT NOT NULL,
                response_text TEXT NOT NULL
            )
            "#,
            self.table
        );

        sqlx::query(&create_table_query)
            .execute(&self.db_pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ProcessedStore for PgProcessedStore {
    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE post_id = $1)",
            self.table
        );

        let exists: bool = sqlx::query_scalar(&query)
            .bind(post_id)
            .fetch_one(&self.db_pool)
            .await?;

        Ok(exists)
    }

    async fn record(&self, record: ProcessedRecord) -> Result<(), StoreError> {
        let insert_query = format!(
            r#"
            INSERT INTO {} (post_id, processed_at, source_text, response_text)
            VALUES ($1, $2, $3, $4)
            "#,
            self.table
        );

        let result = sqlx::query(&insert_query)
            .bind(&record.post_id)
            .bind(record.processed_at)
            .bind(&record.source_text)
            .bind(&record.response_text)
            .execute(&self.db_pool)
            .await;

        match result {
            Ok(_) => {
                log::debug!("Recorded post {} as processed", record.post_id);
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(record.post_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}
