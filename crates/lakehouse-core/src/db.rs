// crates/lakehouse-core/src/db.rs

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use tracing::info;

use crate::config::WarehouseConfig;
use crate::error::Result;

pub type DbPool = Pool<Postgres>;

/// Opens the warehouse connection pool. The caller owns the pool and is
/// expected to `close()` it once the run finishes, whatever the outcome.
pub async fn connect(database_url: &str, settings: &WarehouseConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(database_url)
        .await?;

    info!(
        max_connections = settings.max_connections,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Applies the star-schema migrations embedded at compile time.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
