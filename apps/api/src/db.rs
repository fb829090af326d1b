use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Opens the PostgreSQL pool. Sized so a full batch fan-out (extraction and
/// scoring workers writing concurrently) never starves the request handlers.
pub async fn create_pool(database_url: &str, batch_concurrency: usize) -> Result<PgPool> {
    let max_connections = (batch_concurrency as u32 * 2).max(8);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    info!("PostgreSQL pool ready ({max_connections} connections max)");
    Ok(pool)
}
