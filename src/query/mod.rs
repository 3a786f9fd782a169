//! Result-table materialization for gisql.
//!
//! This module isolates statement execution and the caller-facing outcome
//! type from the pipeline orchestrator.

pub mod executor;
pub mod outcome;

pub use executor::ExecutionCoordinator;
pub use outcome::{ExecutionOutcome, LayerSource, RESULT_LAYER_NAME};
