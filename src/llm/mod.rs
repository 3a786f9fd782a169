//! Model integration for gisql.
//!
//! A model turns a composed prompt (or the raw context, for services that
//! build their own prompt) into free text that should contain one SQL
//! statement. Everything it returns is untrusted.

pub mod command;
pub mod factory;
pub mod mock;
pub mod ollama;
pub mod prompt;
pub mod sanitize;
pub mod service;

pub use command::CommandGenerator;
pub use factory::create_generator;
pub use mock::MockSqlGenerator;
pub use ollama::{OllamaClient, OllamaConfig};
pub use prompt::compose;
pub use sanitize::sanitize;
pub use service::Nl2SqlServiceClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::context::QueryContext;
use crate::error::Result;

/// Everything a generator may need for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub context: QueryContext,
    /// The composed prompt for `context`.
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(context: QueryContext, prompt: impl Into<String>) -> Self {
        Self {
            context,
            prompt: prompt.into(),
        }
    }
}

/// Trait for clients that generate SQL text from a request.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Returns the raw model output for `request`.
    ///
    /// The output is not sanitized or validated.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Model provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// HTTP NL→SQL service exposing `POST /nl2sql`.
    #[default]
    Service,
    /// Ollama HTTP API (`POST /api/generate`).
    Ollama,
    /// Local executable fed the prompt on stdin.
    Command,
    /// Canned responses for testing.
    Mock,
}

impl ModelProvider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Ollama => "ollama",
            Self::Command => "command",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for ModelProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service" | "nl2sql" => Ok(Self::Service),
            "ollama" => Ok(Self::Ollama),
            "command" | "local" => Ok(Self::Command),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown model provider: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
