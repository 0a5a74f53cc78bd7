use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::time::Duration;

use crate::StoreError;

/// Connection settings for the document database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Applied to every connection; bounds how long a document transaction can hold its rows
    pub statement_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            statement_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    fn statement_timeout_sql(&self) -> String {
        format!("SET statement_timeout = '{}ms'", self.statement_timeout.as_millis())
    }
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str, settings: PoolSettings) -> Result<PgPool, StoreError> {
    let timeout_sql = settings.statement_timeout_sql();
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let sql = timeout_sql.clone();
            Box::pin(async move {
                conn.execute(sql.as_str()).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create or upgrade the `documents` table
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
