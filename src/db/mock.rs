//! Mock database clients for testing.
//!
//! `MockDatabaseClient` keeps tables in memory and records every call, so
//! tests can assert what the pipeline did (or did not do) to the database.

use super::{Column, SpatialDatabase};
use crate::context::TableRef;
use crate::error::{GisqlError, Result};
use crate::safety::{projected_columns, RESULT_GEOMETRY_ALIAS};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<TableRef, Vec<Column>>,
    executed: Vec<String>,
    introspected: Vec<TableRef>,
}

/// An in-memory database that understands `DROP TABLE` and `CREATE TABLE AS`.
#[derive(Debug, Default)]
pub struct MockDatabaseClient {
    state: Mutex<MockState>,
    fail_patterns: Vec<String>,
}

impl MockDatabaseClient {
    /// Creates a new mock database with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table with the given `(name, type)` columns.
    pub fn with_table(self, table: TableRef, columns: &[(&str, &str)]) -> Self {
        let columns = columns
            .iter()
            .map(|(name, data_type)| Column::new(*name, *data_type))
            .collect();
        self.lock().tables.insert(table, columns);
        self
    }

    /// Makes every statement containing `pattern` (case-insensitive) fail.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_patterns.push(pattern.into().to_lowercase());
        self
    }

    /// Returns every statement passed to `execute_sql`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Returns every table passed to `table_columns`, in order.
    pub fn introspected(&self) -> Vec<TableRef> {
        self.lock().introspected.clone()
    }

    /// Returns the total number of calls made against this database.
    pub fn call_count(&self) -> usize {
        let state = self.lock();
        state.executed.len() + state.introspected.len()
    }

    /// Returns the current columns of `table`, if it exists.
    pub fn columns_of(&self, table: &TableRef) -> Option<Vec<Column>> {
        self.lock().tables.get(table).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SpatialDatabase for MockDatabaseClient {
    async fn execute_sql(&self, sql: &str) -> Result<()> {
        let mut state = self.lock();
        state.executed.push(sql.to_string());

        let lowered = sql.to_lowercase();
        if let Some(pattern) = self.fail_patterns.iter().find(|p| lowered.contains(*p)) {
            return Err(GisqlError::query(format!(
                "ERROR: mock failure on statement matching '{pattern}'"
            )));
        }

        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            [verb, kind, if_, exists, name, ..]
                if verb.eq_ignore_ascii_case("drop")
                    && kind.eq_ignore_ascii_case("table")
                    && if_.eq_ignore_ascii_case("if")
                    && exists.eq_ignore_ascii_case("exists") =>
            {
                if let Some(table) = parse_table_name(name) {
                    state.tables.remove(&table);
                }
                Ok(())
            }
            [verb, kind, name, ..]
                if verb.eq_ignore_ascii_case("create") && kind.eq_ignore_ascii_case("table") =>
            {
                let table = parse_table_name(name)
                    .ok_or_else(|| GisqlError::query("ERROR: syntax error in table name"))?;
                if state.tables.contains_key(&table) {
                    return Err(GisqlError::query(format!(
                        "ERROR: relation \"{table}\" already exists"
                    )));
                }
                let columns = projected_columns(sql)
                    .into_iter()
                    .map(|name| {
                        let data_type = if name == RESULT_GEOMETRY_ALIAS {
                            "geometry"
                        } else {
                            "unknown"
                        };
                        Column::new(name, data_type)
                    })
                    .collect();
                state.tables.insert(table, columns);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn table_columns(&self, table: &TableRef) -> Result<Vec<Column>> {
        let mut state = self.lock();
        state.introspected.push(table.clone());
        Ok(state.tables.get(table).cloned().unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Parses `schema.table` (quotes stripped) from a statement word.
fn parse_table_name(word: &str) -> Option<TableRef> {
    TableRef::parse(&word.replace('"', ""))
}

/// A database that fails every call, for connection-failure tests.
#[derive(Debug, Default)]
pub struct FailingDatabaseClient;

#[async_trait]
impl SpatialDatabase for FailingDatabaseClient {
    async fn execute_sql(&self, _sql: &str) -> Result<()> {
        Err(GisqlError::connection("Cannot connect to localhost:5432"))
    }

    async fn table_columns(&self, _table: &TableRef) -> Result<Vec<Column>> {
        Err(GisqlError::connection("Cannot connect to localhost:5432"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
