use sqlx::SqlitePool;
use tracing::warn;

/// Round-trips a trivial query through the pool.
pub async fn health_check(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

pub async fn database_status(pool: &SqlitePool) -> &'static str {
    match health_check(pool).await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            "unavailable"
        }
    }
}
