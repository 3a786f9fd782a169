//! Integration tests for gisql.

pub mod config_test;
pub mod pipeline_test;
pub mod postgres_test;
