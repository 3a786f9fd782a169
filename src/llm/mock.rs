//! Mock SQL generator for testing.
//!
//! Returns a canned response, optionally after a delay or as a failure, and
//! counts how often it was asked.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{GisqlError, Result};
use crate::llm::{GenerationRequest, SqlGenerator};

/// Canned statement returned by [`MockSqlGenerator::default`].
pub const DEFAULT_MOCK_SQL: &str = "CREATE TABLE public.analysis_result AS SELECT \
    row_number() OVER ()::integer AS result_id, t.geom AS geom FROM public.parcels t";

/// Mock generator with a fixed response.
#[derive(Debug)]
pub struct MockSqlGenerator {
    response: String,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl MockSqlGenerator {
    /// Creates a mock that always answers `response`.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Creates a mock whose every call fails with a generation error.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut mock = Self::new("");
        mock.failure = Some(message.into());
        mock
    }

    /// Sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns how many times `generate` was called.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the most recent request, if any.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for MockSqlGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MOCK_SQL)
    }
}

#[async_trait]
impl SqlGenerator for MockSqlGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.failure {
            Some(message) => Err(GisqlError::generation(message.clone())),
            None => Ok(self.response.clone()),
        }
    }
}
