//! PostgreSQL/PostGIS database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `SpatialDatabase`
//! trait using sqlx.

use crate::config::ConnectionConfig;
use crate::context::TableRef;
use crate::db::{Column, SpatialDatabase};
use crate::error::{GisqlError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, warn};

/// Statement timeout in seconds.
const QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Creates a new PostgresClient from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database, retrying transient failures with backoff.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Connected to {}", config.display_string());
                    return Ok(Self { pool });
                }
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(map_connection_error(e, config)),
            }
        }
    }
}

#[async_trait]
impl SpatialDatabase for PostgresClient {
    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let result = tokio::time::timeout(
            Duration::from_secs(QUERY_TIMEOUT_SECS),
            sqlx::query(sql).execute(&self.pool),
        )
        .await
        .map_err(|_| {
            GisqlError::query(format!(
                "Statement timed out after {QUERY_TIMEOUT_SECS} seconds"
            ))
        })?
        .map_err(|e| GisqlError::query(format_query_error(e)))?;

        debug!(rows = result.rows_affected(), "Statement executed");
        Ok(())
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<Column>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, udt_name::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GisqlError::query(format!("Failed to fetch columns for {table}: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type)| Column { name, data_type })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
}

/// Maps sqlx connection errors to operator-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> GisqlError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        GisqlError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("authentication failed") {
        GisqlError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        GisqlError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("timed out") {
        GisqlError::connection(format!("Connection to {host}:{port} timed out."))
    } else {
        GisqlError::connection(error.to_string())
    }
}

/// Formats an engine error, keeping the server's message and hint verbatim.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = format!("ERROR: {}", db_error.message());
    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests need a PostGIS database and are skipped unless DATABASE_URL is set.

    async fn get_test_client() -> Option<PostgresClient> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = ConnectionConfig::from_connection_string(&url).ok()?;
        PostgresClient::connect(&config).await.ok()
    }

    #[tokio::test]
    async fn test_execute_and_introspect() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        client
            .execute_sql("DROP TABLE IF EXISTS public.gisql_pg_test")
            .await
            .unwrap();
        client
            .execute_sql("CREATE TABLE public.gisql_pg_test AS SELECT 1::integer AS result_id")
            .await
            .unwrap();

        let columns = client
            .table_columns(&TableRef::new("public", "gisql_pg_test"))
            .await
            .unwrap();
        assert_eq!(columns, vec![Column::new("result_id", "int4")]);

        client
            .execute_sql("DROP TABLE public.gisql_pg_test")
            .await
            .unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_table_has_no_columns() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let columns = client
            .table_columns(&TableRef::new("public", "gisql_no_such_table"))
            .await
            .unwrap();
        assert!(columns.is_empty());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_error_is_query_error() {
        let Some(client) = get_test_client().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let error = client
            .execute_sql("CREATE TABLE public.gisql_x AS SELECT * FROM gisql_nonexistent")
            .await
            .unwrap_err();
        assert!(matches!(error, GisqlError::Query(_)));
        assert!(error.to_string().contains("gisql_nonexistent"));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_error_is_connection_error() {
        let config = ConnectionConfig {
            host: Some("nonexistent.invalid.host".to_string()),
            port: 5432,
            database: Some("gis".to_string()),
            user: Some("gis".to_string()),
            password: None,
        };

        let error = PostgresClient::connect(&config).await.unwrap_err();
        assert!(matches!(error, GisqlError::Connection(_)));
    }
}
