//! Client for an HTTP NL→SQL service.
//!
//! The service owns its own prompt: it receives the caller's context as JSON
//! on `POST {base}/nl2sql` and answers `{"sql": "..."}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{GisqlError, Result};
use crate::llm::{GenerationRequest, SqlGenerator};

/// Default service address of the reference deployment.
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";

/// Default timeout for service requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// HTTP NL→SQL service client.
#[derive(Debug, Clone)]
pub struct Nl2SqlServiceClient {
    endpoint: Url,
    client: Client,
}

impl Nl2SqlServiceClient {
    /// Creates a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GisqlError::generation(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { endpoint, client })
    }

    /// Returns the full `/nl2sql` endpoint URL.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn endpoint_url(base_url: &str) -> Result<Url> {
    let base = Url::parse(base_url.trim_end_matches('/'))
        .map_err(|e| GisqlError::config(format!("Invalid model service URL '{base_url}': {e}")))?;
    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(GisqlError::config(format!(
            "Invalid model service URL '{base_url}': expected http or https"
        )));
    }
    let path = format!("{}/nl2sql", base.path().trim_end_matches('/'));
    let mut endpoint = base;
    endpoint.set_path(&path);
    Ok(endpoint)
}

#[async_trait]
impl SqlGenerator for Nl2SqlServiceClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let context = &request.context;
        let body = ServiceRequest {
            question: &context.question,
            schema: &context.schema,
            table: &context.table,
            geom: &context.geom_column,
        };

        debug!(endpoint = %self.endpoint, "Sending question to NL2SQL service");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GisqlError::generation("Request to NL2SQL service timed out")
                } else if e.is_connect() {
                    GisqlError::generation(format!(
                        "Failed to connect to NL2SQL service at {}",
                        self.endpoint
                    ))
                } else {
                    GisqlError::generation(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GisqlError::generation(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(GisqlError::generation(format!(
                "NL2SQL service error ({}): {}",
                status, text
            )));
        }

        parse_response(&text)
    }
}

fn parse_response(body: &str) -> Result<String> {
    let response: ServiceResponse = serde_json::from_str(body)
        .map_err(|e| GisqlError::generation(format!("Malformed service response: {}", e)))?;
    Ok(response.sql)
}

#[derive(Debug, Serialize)]
struct ServiceRequest<'a> {
    question: &'a str,
    schema: &'a str,
    table: &'a str,
    geom: &'a str,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    sql: String,
}
