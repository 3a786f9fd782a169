//! Configuration file integration tests.

use std::io::Write;

use gisql::config::{Config, ConnectionConfig};
use gisql::llm::ModelProvider;
use gisql::pipeline::Pipeline;

#[test]
fn test_config_file_drives_pipeline_settings() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[pipeline]
result_schema = "work"
result_table = "nl_result"

[model]
provider = "mock"

[connections.default]
host = "gis.internal"
database = "gis"
"#
    )
    .unwrap();

    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.model.provider, ModelProvider::Mock);

    let generator = gisql::llm::create_generator(
        &config.model,
        config.pipeline.generation_timeout(),
    )
    .unwrap();
    let pipeline = Pipeline::new(
        &config.pipeline,
        std::sync::Arc::from(generator),
        std::sync::Arc::new(gisql::db::MockDatabaseClient::new()),
    );
    assert_eq!(pipeline.result_table().to_string(), "work.nl_result");

    let overrides = ConnectionConfig {
        database: Some("scratch".to_string()),
        ..ConnectionConfig::default()
    };
    let connection = config.resolve_connection(None, &overrides).unwrap();
    assert_eq!(connection.host.as_deref(), Some("gis.internal"));
    assert_eq!(connection.database.as_deref(), Some("scratch"));
}

#[test]
fn test_unknown_named_connection_is_an_error() {
    let config = Config::default();
    assert!(config
        .resolve_connection(Some("missing"), &ConnectionConfig::default())
        .is_err());
}
