//! Integration tests for gisql.
//!
//! Pipeline tests run against in-memory mocks. Postgres tests additionally
//! need a PostGIS database; set DATABASE_URL to run them.
//!
//! Run with: `cargo test --test integration_tests`

mod integration;
