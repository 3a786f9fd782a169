//! End-to-end pipeline tests against mock clients.

use std::sync::Arc;
use std::time::Duration;

use gisql::config::{ModelConfig, PipelineConfig};
use gisql::context::{QueryContext, TableRef};
use gisql::db::MockDatabaseClient;
use gisql::llm::{create_generator, MockSqlGenerator, ModelProvider};
use gisql::pipeline::Pipeline;
use gisql::query::ExecutionOutcome;
use gisql::safety::RejectionReason;
use tokio_util::sync::CancellationToken;

const RIVER_SQL: &str = "CREATE TABLE public.analysis_result AS SELECT \
    row_number() OVER ()::integer AS result_id, b.geom AS geom, b.name AS name \
    FROM public.buildings b \
    WHERE EXISTS (SELECT 1 FROM public.rivers r WHERE ST_DWithin(b.geom, r.geom, 50))";

fn context() -> QueryContext {
    QueryContext::new("buildings within 50 m of a river", "public", "buildings", "geom")
}

fn database() -> Arc<MockDatabaseClient> {
    Arc::new(MockDatabaseClient::new().with_table(
        TableRef::new("public", "buildings"),
        &[("gid", "int4"), ("name", "text"), ("geom", "geometry")],
    ))
}

#[tokio::test]
async fn test_end_to_end_materializes_layer() {
    let db = database();
    let generator = Arc::new(MockSqlGenerator::new(format!("```sql\n{RIVER_SQL};\n```")));
    let pipeline = Pipeline::new(&PipelineConfig::default(), generator, db.clone());

    let report = pipeline
        .run_report(&context(), CancellationToken::new())
        .await;

    assert_eq!(
        report.outcome,
        ExecutionOutcome::Materialized(TableRef::new("public", "analysis_result"))
    );
    assert_eq!(report.sql.as_deref(), Some(RIVER_SQL));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(
        report.layer.unwrap().to_uri(),
        "table=\"public\".\"analysis_result\" (geom) key='result_id'"
    );

    let columns = db.columns_of(&TableRef::default()).unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["result_id", "geom", "name"]);
}

#[tokio::test]
async fn test_minimal_result_has_identifier_and_geometry() {
    let db = Arc::new(MockDatabaseClient::new().with_table(
        TableRef::new("public", "parcels"),
        &[("gid", "int4"), ("geom", "geometry")],
    ));
    let generator = Arc::new(MockSqlGenerator::default());
    let context = QueryContext::new("all parcels", "public", "parcels", "geom");

    let outcome = Pipeline::new(&PipelineConfig::default(), generator, db.clone())
        .run(&context)
        .await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Materialized(TableRef::new("public", "analysis_result"))
    );
    let columns = db.columns_of(&TableRef::default()).unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["result_id", "geom"]);
}

#[tokio::test]
async fn test_column_ceiling_rejects_before_execution() {
    let db = database();
    let generator = Arc::new(MockSqlGenerator::new(RIVER_SQL));
    let config = PipelineConfig {
        max_extra_columns: Some(0),
        ..PipelineConfig::default()
    };
    let outcome = Pipeline::new(&config, generator, db.clone())
        .run(&context())
        .await;

    match outcome {
        ExecutionOutcome::ValidationRejected(rejection) => {
            assert_eq!(rejection.reason, RejectionReason::ExtraneousColumns);
            assert_eq!(rejection.candidate, RIVER_SQL);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_wrong_base_table_is_rejected() {
    let db = database();
    let generator = Arc::new(MockSqlGenerator::new(RIVER_SQL.replace(
        "FROM public.buildings b",
        "FROM public.parcels b",
    )));
    let outcome = Pipeline::new(&PipelineConfig::default(), generator, db.clone())
        .run(&context())
        .await;

    assert!(matches!(
        outcome,
        ExecutionOutcome::ValidationRejected(ref r) if r.reason == RejectionReason::BaseTableMismatch
    ));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_slow_model_times_out_without_database_calls() {
    let db = database();
    let generator =
        Arc::new(MockSqlGenerator::new(RIVER_SQL).with_delay(Duration::from_secs(30)));
    let outcome = Pipeline::new(&PipelineConfig::default(), generator, db.clone())
        .with_generation_timeout(Duration::from_millis(50))
        .run(&context())
        .await;

    assert!(matches!(outcome, ExecutionOutcome::GenerationFailed(_)));
    assert_eq!(db.call_count(), 0);
}

#[tokio::test]
async fn test_custom_result_table() {
    let db = database();
    let sql = RIVER_SQL.replace("public.analysis_result", "work.river_buildings");
    let config = PipelineConfig {
        result_schema: "work".to_string(),
        result_table: "river_buildings".to_string(),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(&config, Arc::new(MockSqlGenerator::new(sql)), db.clone());

    let outcome = pipeline.run(&context()).await;

    assert_eq!(
        outcome,
        ExecutionOutcome::Materialized(TableRef::new("work", "river_buildings"))
    );
    assert_eq!(
        db.executed()[0],
        "DROP TABLE IF EXISTS work.river_buildings"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_provider_end_to_end() {
    let script = format!("cat > /dev/null; printf '%s\\n' '```sql' \"{RIVER_SQL}\" '```'");
    let model = ModelConfig {
        provider: ModelProvider::Command,
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        ..ModelConfig::default()
    };
    let generator = create_generator(&model, Duration::from_secs(10)).unwrap();
    let db = database();
    let pipeline = Pipeline::new(&PipelineConfig::default(), Arc::from(generator), db.clone());

    let outcome = pipeline.run(&context()).await;

    assert!(outcome.is_success(), "unexpected outcome: {outcome}");
    assert_eq!(db.executed()[1], RIVER_SQL);
}
