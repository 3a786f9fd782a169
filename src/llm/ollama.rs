//! Ollama client implementation.
//!
//! Sends the composed prompt to a local Ollama instance through its
//! non-streaming generate endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{GisqlError, Result};
use crate::llm::{GenerationRequest, SqlGenerator};

/// Default timeout for API requests; matches the pipeline's generation bound.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default Ollama API URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model pulled by the reference deployment.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// Ollama client configuration.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model to use (e.g., "llama3", "sqlcoder").
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl OllamaConfig {
    /// Creates a new config with the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_MODEL)
    }
}

/// Ollama generator.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
    client: Client,
}

impl OllamaClient {
    /// Creates a new Ollama client with the given configuration.
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GisqlError::generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Returns the generate API endpoint URL.
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.config.base_url)
    }
}

#[async_trait]
impl SqlGenerator for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = OllamaRequest {
            model: &self.config.model,
            prompt: &request.prompt,
            stream: false,
        };

        debug!(model = %self.config.model, "Sending prompt to Ollama");
        let response = self
            .client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GisqlError::generation("Request to Ollama timed out")
                } else if e.is_connect() {
                    GisqlError::generation(
                        "Failed to connect to Ollama. Is it running? Try: ollama serve",
                    )
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
                "Ollama API error ({}): {}",
                status, text
            )));
        }

        parse_response(&text)
    }
}

fn parse_response(body: &str) -> Result<String> {
    let response: OllamaResponse = serde_json::from_str(body)
        .map_err(|e| GisqlError::generation(format!("Failed to parse response: {}", e)))?;
    Ok(response.response)
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = OllamaConfig::new("llama3");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_config_with_url_trims_slash() {
        let config = OllamaConfig::default().with_url("http://gpu-box:11434/");
        assert_eq!(config.base_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_config_with_timeout() {
        let config = OllamaConfig::default().with_timeout(120);
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_generate_url() {
        let client = OllamaClient::new(OllamaConfig::default()).unwrap();
        assert_eq!(client.generate_url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_request_body_shape() {
        let body = OllamaRequest {
            model: "llama3",
            prompt: "Return ONLY the SQL.",
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "llama3", "prompt": "Return ONLY the SQL.", "stream": false})
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"model":"llama3","response":"SELECT 1","done":true}"#;
        assert_eq!(parse_response(body).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_parse_malformed_response() {
        let error = parse_response(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(error, GisqlError::Generation(_)));
    }
}
