//! Database module
//!
//! Pool setup and schema checks for the Postgres event store. The schema
//! itself lives in `migrations/`.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Tables the Postgres event store reads and writes
pub const REQUIRED_TABLES: &[&str] = &["events", "idempotency_keys"];

#[derive(Debug, thiserror::Error)]
pub enum DbSetupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database schema incomplete, missing tables: {}", .0.join(", "))]
    SchemaIncomplete(Vec<&'static str>),
}

/// Open a pool, check connectivity and make sure the schema is in place
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbSetupError> {
    tracing::info!(max_connections, "Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    verify_connection(&pool).await?;

    let missing = missing_tables(&pool).await?;
    if !missing.is_empty() {
        pool.close().await;
        return Err(DbSetupError::SchemaIncomplete(missing));
    }

    tracing::info!("Database connected successfully");
    Ok(pool)
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Required tables absent from the public schema
pub async fn missing_tables(pool: &PgPool) -> Result<Vec<&'static str>, sqlx::Error> {
    let mut missing = Vec::new();
    for &table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(table = %table, "Required table does not exist");
            missing.push(table);
        }
    }
    Ok(missing)
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    Ok(missing_tables(pool).await?.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_incomplete_lists_tables() {
        let err = DbSetupError::SchemaIncomplete(vec!["events", "idempotency_keys"]);
        assert_eq!(
            err.to_string(),
            "Database schema incomplete, missing tables: events, idempotency_keys"
        );
    }
}
