//! SQL generator factory.
//!
//! Centralizes provider-specific construction of generators.

use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::llm::ollama::DEFAULT_OLLAMA_URL;
use crate::llm::service::DEFAULT_SERVICE_URL;
use crate::llm::{
    CommandGenerator, MockSqlGenerator, ModelProvider, Nl2SqlServiceClient, OllamaClient,
    OllamaConfig, SqlGenerator,
};

/// Creates a generator for the configured provider.
///
/// `timeout` bounds HTTP requests; the pipeline applies its own bound on top.
pub fn create_generator(config: &ModelConfig, timeout: Duration) -> Result<Box<dyn SqlGenerator>> {
    match config.provider {
        ModelProvider::Service => {
            let url = config.url.as_deref().unwrap_or(DEFAULT_SERVICE_URL);
            Ok(Box::new(Nl2SqlServiceClient::with_timeout(url, timeout)?))
        }
        ModelProvider::Ollama => {
            let ollama = OllamaConfig::new(&config.model)
                .with_url(config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL))
                .with_timeout(timeout.as_secs());
            Ok(Box::new(OllamaClient::new(ollama)?))
        }
        ModelProvider::Command => Ok(Box::new(CommandGenerator::new(
            &config.command,
            config.args.clone(),
        ))),
        ModelProvider::Mock => Ok(Box::new(MockSqlGenerator::default())),
    }
}
