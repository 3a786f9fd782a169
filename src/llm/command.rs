//! Local-process generator.
//!
//! Runs a model executable (by default `ollama run llama3`), writes the
//! prompt to its stdin and takes its stdout as the raw answer. The child is
//! killed if the pipeline stops waiting for it.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{GisqlError, Result};
use crate::llm::{GenerationRequest, SqlGenerator};

/// Default executable.
pub const DEFAULT_COMMAND: &str = "ollama";

/// Default arguments.
pub const DEFAULT_ARGS: &[&str] = &["run", "llama3"];

/// Generator backed by a local executable.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Creates a generator that runs `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Returns the command line, for log lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for CommandGenerator {
    fn default() -> Self {
        Self::new(
            DEFAULT_COMMAND,
            DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
        )
    }
}

#[async_trait]
impl SqlGenerator for CommandGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(command = %self.command_line(), "Spawning model process");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GisqlError::generation(format!("Failed to start '{}': {}", self.program, e))
            })?;

        // The prompt is written while stdout and stderr drain, so a child that
        // exits or fills its output pipe early cannot stall the write. Stdin
        // is dropped once written, which closes the pipe.
        let stdin = child.stdin.take();
        let write_prompt = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(request.prompt.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(write_prompt, child.wait_with_output());

        let output =
            output.map_err(|e| GisqlError::generation(format!("Model process failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GisqlError::generation(format!(
                "'{}' exited with {}: {}",
                self.command_line(),
                output.status,
                stderr.trim()
            )));
        }

        match written {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Model process stopped reading the prompt early");
            }
            Err(e) => {
                return Err(GisqlError::generation(format!(
                    "Failed to write prompt: {}",
                    e
                )));
            }
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::QueryContext;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(
            QueryContext::new("q", "public", "parcels", "geom"),
            prompt,
        )
    }

    #[test]
    fn test_default_command_line() {
        assert_eq!(CommandGenerator::default().command_line(), "ollama run llama3");
    }

    #[tokio::test]
    async fn test_missing_executable_is_generation_error() {
        let generator = CommandGenerator::new("gisql-no-such-model-binary", vec![]);
        let error = generator.generate(&request("x")).await.unwrap_err();
        assert!(matches!(error, GisqlError::Generation(_)));
        assert!(error.to_string().contains("Failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_goes_to_stdin() {
        let generator = CommandGenerator::new("cat", vec![]);
        let output = generator.generate(&request("SELECT 1")).await.unwrap();
        assert_eq!(output, "SELECT 1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_generation_error() {
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".to_string(), "echo model missing >&2; exit 3".to_string()],
        );
        let error = generator.generate(&request("x")).await.unwrap_err();
        assert!(error.to_string().contains("model missing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_with_large_prompt_reports_stderr() {
        let prompt = "x".repeat(1 << 20);
        let generator = CommandGenerator::new(
            "sh",
            vec!["-c".to_string(), "echo model missing >&2; exit 3".to_string()],
        );
        let error = generator.generate(&request(&prompt)).await.unwrap_err();
        assert!(matches!(error, GisqlError::Generation(_)));
        assert!(error.to_string().contains("model missing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unread_large_prompt_still_returns_output() {
        let prompt = "x".repeat(1 << 20);
        let generator =
            CommandGenerator::new("sh", vec!["-c".to_string(), "echo SELECT 1".to_string()]);
        let output = generator.generate(&request(&prompt)).await.unwrap();
        assert_eq!(output, "SELECT 1\n");
    }
}
