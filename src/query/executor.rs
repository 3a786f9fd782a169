//! Execute-and-replace protocol for the result table.
//!
//! The result table is dropped and recreated on every run. The drop is not
//! undone if the create then fails, so a failed run leaves no result table.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::context::TableRef;
use crate::db::SpatialDatabase;
use crate::query::ExecutionOutcome;
use crate::safety::ValidatedStatement;

/// Materializes validated statements into the result table.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    result_table: TableRef,
}

impl ExecutionCoordinator {
    /// Creates a coordinator for `result_table`.
    pub fn new(result_table: TableRef) -> Self {
        Self { result_table }
    }

    /// Returns the table this coordinator replaces.
    pub fn result_table(&self) -> &TableRef {
        &self.result_table
    }

    /// Returns the statement that removes a stale result table.
    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.result_table)
    }

    /// Drops any stale result table, then executes `statement`.
    ///
    /// Takes the statement by value so it runs at most once. Neither step is
    /// retried.
    pub async fn materialize(
        &self,
        statement: ValidatedStatement,
        db: &dyn SpatialDatabase,
    ) -> ExecutionOutcome {
        let start = Instant::now();

        if let Err(e) = db.execute_sql(&self.drop_statement()).await {
            warn!(table = %self.result_table, "Dropping stale result table failed: {}", e);
            return ExecutionOutcome::ExecutionFailed(e.message().to_string());
        }
        debug!(table = %self.result_table, "Stale result table dropped");

        if let Err(e) = db.execute_sql(statement.sql()).await {
            warn!(table = %self.result_table, "Creating result table failed: {}", e);
            return ExecutionOutcome::ExecutionFailed(e.message().to_string());
        }

        info!(
            table = %self.result_table,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Result table materialized"
        );
        ExecutionOutcome::Materialized(self.result_table.clone())
    }
}
