//! Database abstraction layer for gisql.
//!
//! The pipeline needs very little from the spatial database: run a statement,
//! list the columns of a table, and close the connection. Keeping it behind a
//! trait lets the pipeline run against an in-memory mock in tests.

mod mock;
mod postgres;
mod schema;

pub use mock::{FailingDatabaseClient, MockDatabaseClient};
pub use postgres::PostgresClient;
pub use schema::{describe_columns, find_column, Column};

use crate::config::ConnectionConfig;
use crate::context::TableRef;
use crate::error::Result;
use async_trait::async_trait;

/// Creates a PostgreSQL client for the given connection configuration.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn SpatialDatabase>> {
    let client = PostgresClient::connect(config).await?;
    Ok(Box::new(client))
}

/// Trait defining the interface for spatial database clients.
///
/// All operations are async and return Results with GisqlError.
#[async_trait]
pub trait SpatialDatabase: Send + Sync {
    /// Executes a statement that returns no rows (DDL or `CREATE TABLE AS`).
    async fn execute_sql(&self, sql: &str) -> Result<()>;

    /// Returns the columns of `table` in ordinal order.
    ///
    /// A table that does not exist has no columns.
    async fn table_columns(&self, table: &TableRef) -> Result<Vec<Column>>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}
