//! Error types for the execution-and-evaluation pipeline.
//!
//! Generation failures are fatal to a run once retries are exhausted.
//! Evaluation failures never leave the evaluation runner; they are kept as
//! the reason behind a fallback evaluation.

use promptops_types::{FallbackReason, StoreError};
use thiserror::Error;

/// Errors reported by a model provider for a single call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network error, timeout, or connection issue.
    #[error("request failed: {0}")]
    Request(String),

    /// Provider answered with a non-success status.
    #[error("provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// Provider answered successfully but without any text.
    #[error("provider returned an empty response")]
    EmptyResponse,

    /// Response body did not have the expected shape.
    #[error("failed to parse provider response: {0}")]
    Parse(String),

    /// Provider cannot be used as configured (missing key, bad client setup).
    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Request(err.to_string())
    }
}

/// Generation could not produce usable text within the retry budget.
#[derive(Debug, Error)]
#[error("generation failed after {attempts} attempt(s): {last_error}")]
pub struct GenerationFailure {
    pub attempts: u32,
    #[source]
    pub last_error: ProviderError,
}

/// Why the structured evaluation produced no usable scores.
#[derive(Debug, Error)]
pub enum EvaluationFailure {
    #[error("evaluation call failed: {0}")]
    CallFailed(#[source] ProviderError),

    #[error("evaluation payload malformed: {0}")]
    MalformedPayload(String),
}

impl EvaluationFailure {
    pub fn reason(&self) -> FallbackReason {
        match self {
            EvaluationFailure::CallFailed(_) => FallbackReason::CallFailed,
            EvaluationFailure::MalformedPayload(_) => FallbackReason::MalformedPayload,
        }
    }
}

/// Terminal failure of one orchestrated run. No records exist for it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Generation(#[from] GenerationFailure),

    #[error("run cancelled")]
    Cancelled,
}

/// Errors from callers that combine the pipeline with a store.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
