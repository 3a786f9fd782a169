//! PostGIS integration tests.
//!
//! These need a PostgreSQL database with the PostGIS extension available.
//! Set DATABASE_URL to run them.

use std::sync::Arc;

use gisql::config::{ConnectionConfig, PipelineConfig};
use gisql::context::{QueryContext, TableRef};
use gisql::db::{PostgresClient, SpatialDatabase};
use gisql::llm::MockSqlGenerator;
use gisql::pipeline::Pipeline;
use gisql::query::ExecutionOutcome;

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

/// Creates a small point table; returns false when PostGIS is unavailable.
async fn seed(client: &PostgresClient, schema: &str) -> bool {
    if let Err(e) = client.execute_sql("CREATE EXTENSION IF NOT EXISTS postgis").await {
        eprintln!("Skipping test: PostGIS unavailable ({e})");
        return false;
    }
    for sql in [
        format!("DROP SCHEMA IF EXISTS {schema} CASCADE"),
        format!("CREATE SCHEMA {schema}"),
        format!("CREATE TABLE {schema}.wells (gid serial PRIMARY KEY, depth integer, geom geometry(Point, 4326))"),
        format!(
            "INSERT INTO {schema}.wells (depth, geom) VALUES \
             (10, ST_SetSRID(ST_MakePoint(0, 0), 4326)), \
             (80, ST_SetSRID(ST_MakePoint(1, 1), 4326))"
        ),
    ] {
        client.execute_sql(&sql).await.unwrap();
    }
    true
}

#[tokio::test]
async fn test_table_columns() {
    const SCHEMA: &str = "gisql_it_columns";

    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    if !seed(&client, SCHEMA).await {
        return;
    }

    let columns = client
        .table_columns(&TableRef::new(SCHEMA, "wells"))
        .await
        .unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["gid", "depth", "geom"]);
    assert!(columns[2].is_geometry());

    let missing = client
        .table_columns(&TableRef::new(SCHEMA, "no_such_table"))
        .await
        .unwrap();
    assert!(missing.is_empty());

    client.execute_sql(&format!("DROP SCHEMA {SCHEMA} CASCADE")).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_pipeline_materializes_in_postgis() {
    const SCHEMA: &str = "gisql_it_pipeline";

    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    if !seed(&client, SCHEMA).await {
        return;
    }
    let client = Arc::new(client);

    let sql = format!(
        "CREATE TABLE {SCHEMA}.analysis_result AS SELECT \
         row_number() OVER 0::integer AS result_id, w.geom AS geom \
         FROM {SCHEMA}.wells w WHERE w.depth > 50"
    );
    let config = PipelineConfig {
        result_schema: SCHEMA.to_string(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(&config, Arc::new(MockSqlGenerator::new(sql)), client.clone());
    let context = QueryContext::new("wells deeper than 50", SCHEMA, "wells", "geom");

    // Twice: the second run must replace the first result.
    for _ in 0..2 {
        let outcome = pipeline.run(&context).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Materialized(TableRef::new(SCHEMA, "analysis_result"))
        );
    }

    client.execute_sql(&format!("DROP SCHEMA {SCHEMA} CASCADE")).await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_engine_error_is_reported_verbatim() {
    const SCHEMA: &str = "gisql_it_engine";

    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    if !seed(&client, SCHEMA).await {
        return;
    }
    let client = Arc::new(client);

    let sql = format!(
        "CREATE TABLE {SCHEMA}.analysis_result AS SELECT \
         row_number() OVER ()::integer AS result_id, w.geom AS geom \
         FROM {SCHEMA}.wells w WHERE w.no_such_column > 50"
    );
    let config = PipelineConfig {
        result_schema: SCHEMA.to_string(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(&config, Arc::new(MockSqlGenerator::new(sql)), client.clone());
    let context = QueryContext::new("deep wells", SCHEMA, "wells", "geom");

    match pipeline.run(&context).await {
        ExecutionOutcome::ExecutionFailed(reason) => assert!(reason.contains("no_such_column")),
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }

    client.execute_sql(&format!("DROP SCHEMA {SCHEMA} CASCADE")).await.unwrap();
    client.close().await.unwrap();
}
