//! Error types for the release orchestrator

use std::time::Duration;

use thiserror::Error;

/// Main error type for the release orchestrator
#[derive(Error, Debug)]
pub enum DeployError {
    /// Missing template, wrong request shape, unusable working directory
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The external CLI exited non-zero
    #[error("Command failed: {command}: {output}")]
    ToolProcess { command: String, output: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    TimedOut { command: String, timeout: Duration },

    /// The process could not be launched or its pipes broke
    #[error("Failed to launch command: {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The CLI succeeded but its output made no sense
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Only launch failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::Launch { .. })
    }

    pub fn config(message: impl Into<String>) -> Self {
        DeployError::Configuration(message.into())
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
