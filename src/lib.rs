//! gisql - guarded natural-language to PostGIS SQL.
//!
//! A question about a spatial table goes to a model, and the SQL that comes
//! back is validated against a closed rule set before it may replace the
//! result table. This library exposes the pipeline and its parts for the
//! binary and for integration tests.

pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod safety;
