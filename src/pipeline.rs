//! Pipeline orchestration.
//!
//! One invocation runs compose → generate → sanitize → introspect → validate
//! → materialize → verify, strictly in sequence, and maps every failure to a
//! single [`ExecutionOutcome`]. Nothing is kept between invocations.
//!
//! Concurrent runs that share a result table are not serialized; the last
//! create wins.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::context::{QueryContext, TableRef};
use crate::db::{describe_columns, find_column, SpatialDatabase};
use crate::llm::{compose, sanitize, GenerationRequest, SqlGenerator};
use crate::query::{ExecutionCoordinator, ExecutionOutcome, LayerSource};
use crate::safety::{IdentifierColumn, StatementValidator, ValidatedStatement};

/// Result of one stage: a value to continue with, or the terminal outcome.
type Stage<T> = std::result::Result<T, ExecutionOutcome>;

/// Everything a caller may want to show after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: ExecutionOutcome,
    /// The validated statement text, when validation passed.
    pub sql: Option<String>,
    /// Advisory warnings raised by validation.
    pub warnings: Vec<String>,
    /// How to load the result, when it was materialized.
    pub layer: Option<LayerSource>,
}

impl RunReport {
    fn terminal(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            sql: None,
            warnings: Vec::new(),
            layer: None,
        }
    }
}

/// The guarded NL→SQL pipeline.
pub struct Pipeline {
    generator: Arc<dyn SqlGenerator>,
    db: Arc<dyn SpatialDatabase>,
    validator: StatementValidator,
    coordinator: ExecutionCoordinator,
    generation_timeout: Duration,
    verify_result: bool,
}

impl Pipeline {
    /// Creates a pipeline from settings, a model client and a database client.
    pub fn new(
        config: &PipelineConfig,
        generator: Arc<dyn SqlGenerator>,
        db: Arc<dyn SpatialDatabase>,
    ) -> Self {
        let result_table = config.result_table_ref();
        Self {
            generator,
            db,
            validator: StatementValidator::new(result_table.clone())
                .with_max_extra_columns(config.max_extra_columns),
            coordinator: ExecutionCoordinator::new(result_table),
            generation_timeout: config.generation_timeout(),
            verify_result: config.verify_result,
        }
    }

    /// Overrides the generation bound.
    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Returns the table every run replaces.
    pub fn result_table(&self) -> &TableRef {
        self.coordinator.result_table()
    }

    /// Returns the prompt a run for `context` would send.
    pub fn prompt_for(&self, context: &QueryContext) -> String {
        compose(context, self.result_table())
    }

    /// Runs the pipeline once.
    pub async fn run(&self, context: &QueryContext) -> ExecutionOutcome {
        self.run_with_cancel(context, CancellationToken::new()).await
    }

    /// Runs the pipeline once, giving up if `cancel` fires.
    ///
    /// Cancellation during generation yields `GenerationFailed("cancelled")`
    /// without touching the database.
    pub async fn run_with_cancel(
        &self,
        context: &QueryContext,
        cancel: CancellationToken,
    ) -> ExecutionOutcome {
        self.run_report(context, cancel).await.outcome
    }

    /// Runs the pipeline once and returns the outcome with its details.
    pub async fn run_report(&self, context: &QueryContext, cancel: CancellationToken) -> RunReport {
        info!(table = %context.full_table(), geom = %context.geom_column, "Pipeline started");

        let statement = match self.prepare(context, &cancel).await {
            Ok(statement) => statement,
            Err(outcome) => {
                info!(outcome = outcome.label(), "Pipeline finished");
                return RunReport::terminal(outcome);
            }
        };

        let sql = statement.sql().to_string();
        let warnings = statement.warnings().to_vec();
        let identifier = statement.identifier_column();

        let mut outcome = if cancel.is_cancelled() {
            ExecutionOutcome::ExecutionFailed("cancelled before execution".to_string())
        } else {
            self.coordinator.materialize(statement, self.db.as_ref()).await
        };
        if outcome.is_success() && self.verify_result {
            outcome = self.verify_layer(identifier).await;
        }

        let layer = outcome
            .is_success()
            .then(|| LayerSource::new(self.result_table(), identifier));
        if let Some(layer) = &layer {
            info!(source = %layer.to_uri(), "Result layer ready");
        }
        info!(outcome = outcome.label(), "Pipeline finished");

        RunReport {
            outcome,
            sql: Some(sql),
            warnings,
            layer,
        }
    }

    /// Generates and validates without writing to the database.
    ///
    /// The bound table is still introspected.
    pub async fn dry_run(&self, context: &QueryContext) -> Stage<ValidatedStatement> {
        self.prepare(context, &CancellationToken::new()).await
    }

    /// Compose, generate, sanitize, introspect and validate.
    async fn prepare(
        &self,
        context: &QueryContext,
        cancel: &CancellationToken,
    ) -> Stage<ValidatedStatement> {
        let raw = self.generate(context, cancel).await?;
        let candidate = sanitize(&raw);
        debug!(
            raw_chars = raw.len(),
            candidate_chars = candidate.len(),
            "Model output sanitized"
        );

        let source = context.table_ref();
        let columns = self
            .db
            .table_columns(&source)
            .await
            .map_err(|e| ExecutionOutcome::ExecutionFailed(e.message().to_string()))?;
        if columns.is_empty() {
            warn!(table = %source, "Source table has no columns; it may not exist");
        } else {
            debug!(table = %source, columns = %describe_columns(&columns), "Source table introspected");
        }

        match self.validator.validate(&candidate, context, &columns) {
            Ok(statement) => {
                for warning in statement.warnings() {
                    warn!("{}", warning);
                }
                debug!(identifier = %statement.identifier_column(), "Candidate statement accepted");
                Ok(statement)
            }
            Err(rejection) => {
                warn!(reason = %rejection.reason, "Generated SQL rejected: {}", rejection.detail);
                Err(ExecutionOutcome::ValidationRejected(rejection))
            }
        }
    }

    async fn generate(&self, context: &QueryContext, cancel: &CancellationToken) -> Stage<String> {
        let prompt = self.prompt_for(context);
        debug!(prompt_chars = prompt.len(), "Prompt composed");
        let request = GenerationRequest::new(context.clone(), prompt);

        let generation = tokio::time::timeout(self.generation_timeout, self.generator.generate(&request));
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Generation cancelled");
                Err(ExecutionOutcome::GenerationFailed("cancelled".to_string()))
            }
            result = generation => match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(e)) => {
                    warn!("Generation failed: {}", e);
                    Err(ExecutionOutcome::GenerationFailed(e.message().to_string()))
                }
                Err(_) => {
                    warn!(timeout_secs = self.generation_timeout.as_secs_f64(), "Generation timed out");
                    Err(ExecutionOutcome::GenerationFailed(format!(
                        "model did not answer within {:?}",
                        self.generation_timeout
                    )))
                }
            },
        }
    }

    /// Checks that the result table has what a map layer needs.
    async fn verify_layer(&self, identifier: IdentifierColumn) -> ExecutionOutcome {
        let table = self.result_table();
        let columns = match self.db.table_columns(table).await {
            Ok(columns) => columns,
            Err(e) => return ExecutionOutcome::LayerLoadFailed(e.message().to_string()),
        };

        if columns.is_empty() {
            return ExecutionOutcome::LayerLoadFailed(format!("table {table} was not found"));
        }
        let has_geometry = find_column(&columns, "geom").is_some_and(|c| c.is_geometry());
        if !has_geometry {
            return ExecutionOutcome::LayerLoadFailed(format!(
                "table {table} has no geometry column `geom`"
            ));
        }
        if find_column(&columns, identifier.as_str()).is_none() {
            return ExecutionOutcome::LayerLoadFailed(format!(
                "table {table} has no key column `{identifier}`"
            ));
        }
        ExecutionOutcome::Materialized(table.clone())
    }
}
