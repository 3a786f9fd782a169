//! Caller-facing results of a pipeline run.

use std::fmt;

use serde::Serialize;

use crate::context::TableRef;
use crate::safety::{IdentifierColumn, Rejection, RESULT_GEOMETRY_ALIAS};

/// Display name a viewer gives the result layer.
pub const RESULT_LAYER_NAME: &str = "AI Result";

/// The single terminal result of one pipeline invocation.
///
/// Outcomes are never retried; the caller decides what to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The result table was created.
    Materialized(TableRef),
    /// The candidate statement broke a validation rule.
    ValidationRejected(Rejection),
    /// The model did not produce text (timeout, transport error, cancellation).
    GenerationFailed(String),
    /// The database refused the drop or the create. Engine text is verbatim.
    ExecutionFailed(String),
    /// The table exists but a viewer could not load it as a layer.
    LayerLoadFailed(String),
}

impl ExecutionOutcome {
    /// Returns true for `Materialized`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Materialized(_))
    }

    /// Returns a short stable label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Materialized(_) => "materialized",
            Self::ValidationRejected(_) => "validation_rejected",
            Self::GenerationFailed(_) => "generation_failed",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::LayerLoadFailed(_) => "layer_load_failed",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized(table) => write!(f, "Result table {table} is ready"),
            Self::ValidationRejected(rejection) => {
                write!(f, "Generated SQL was rejected ({rejection})")
            }
            Self::GenerationFailed(reason) => write!(f, "SQL generation failed: {reason}"),
            Self::ExecutionFailed(reason) => write!(f, "Error while executing SQL: {reason}"),
            Self::LayerLoadFailed(reason) => write!(
                f,
                "The result table was created, but the layer could not be loaded: {reason}"
            ),
        }
    }
}

/// How a viewer loads the result table as a map layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSource {
    pub schema: String,
    pub table: String,
    pub geometry_column: String,
    pub key_column: String,
}

impl LayerSource {
    /// Describes `table` with the fixed `geom` column and the given key.
    pub fn new(table: &TableRef, key: IdentifierColumn) -> Self {
        Self {
            schema: table.schema.clone(),
            table: table.name.clone(),
            geometry_column: RESULT_GEOMETRY_ALIAS.to_string(),
            key_column: key.as_str().to_string(),
        }
    }

    /// Returns a PostGIS layer data source string, as desktop GIS clients use.
    pub fn to_uri(&self) -> String {
        format!(
            "table=\"{}\".\"{}\" ({}) key='{}'",
            self.schema, self.table, self.geometry_column, self.key_column
        )
    }
}
