//! gisql - guarded natural-language to PostGIS SQL.

use std::sync::Arc;

use gisql::cli::Cli;
use gisql::config::{Config, ConnectionConfig};
use gisql::db::{self, MockDatabaseClient, SpatialDatabase};
use gisql::error::Result;
use gisql::llm::{compose, create_generator};
use gisql::logging;
use gisql::pipeline::Pipeline;
use gisql::query::{ExecutionOutcome, RESULT_LAYER_NAME};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging(&logging::get_log_path());
    } else {
        logging::init_stderr_logging();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Runs one question through the pipeline. Returns whether it succeeded.
async fn run(cli: Cli) -> Result<bool> {
    cli.validate()?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    if let Some(provider) = cli.provider {
        config.model.provider = provider;
    }
    if let Some(url) = &cli.model_url {
        config.model.url = Some(url.clone());
    }

    let context = cli.query_context();
    if cli.print_prompt {
        println!("{}", compose(&context, &config.pipeline.result_table_ref()));
        return Ok(true);
    }

    let generator = create_generator(&config.model, config.pipeline.generation_timeout())?;

    let database: Arc<dyn SpatialDatabase> = if cli.mock_db {
        info!("Using in-memory mock database");
        Arc::new(MockDatabaseClient::new())
    } else {
        let connection = resolve_connection(&cli, &config)?;
        info!("Connection: {}", connection.display_string());
        Arc::from(db::connect(&connection).await?)
    };

    let pipeline = Pipeline::new(&config.pipeline, Arc::from(generator), database.clone());

    info!(provider = %config.model.provider, "Generating SQL");
    let succeeded = if cli.dry_run {
        match pipeline.dry_run(&context).await {
            Ok(statement) => {
                for warning in statement.warnings() {
                    eprintln!("Warning: {warning}");
                }
                println!("{}", statement.sql());
                true
            }
            Err(outcome) => {
                print_failure(&outcome);
                false
            }
        }
    } else {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let report = pipeline.run_report(&context, cancel).await;
        if let Some(sql) = &report.sql {
            println!("{sql}");
        }
        for warning in &report.warnings {
            eprintln!("Warning: {warning}");
        }
        match &report.layer {
            Some(layer) => {
                println!("{}", report.outcome);
                println!("Layer \"{}\": {}", RESULT_LAYER_NAME, layer.to_uri());
            }
            None => print_failure(&report.outcome),
        }
        report.outcome.is_success()
    };

    database.close().await?;
    Ok(succeeded)
}

fn print_failure(outcome: &ExecutionOutcome) {
    eprintln!("{outcome}");
    if let ExecutionOutcome::ValidationRejected(rejection) = outcome {
        eprintln!("Rejected SQL:\n{}", rejection.candidate);
    }
}

/// Resolves the connection from CLI args, config file, and environment.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<ConnectionConfig> {
    let overrides = cli.to_connection_config()?.unwrap_or_default();
    config.resolve_connection(cli.connection_name(), &overrides)
}
