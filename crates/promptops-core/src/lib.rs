//! promptops-core: run prompt versions against a model and score the result.
//! Version → Generate → Evaluate → Score, with persistence left to the caller.
//! See `examples/quickstart.rs` for a quickstart.

pub mod client;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod scoring;
pub mod service;
pub mod testing;

pub mod providers;

pub use client::{EvaluationOutcome, Generation, ModelClient};
pub use config::{PipelineConfig, ProviderKind, RetryConfig};
pub use error::{
    ConfigError, EvaluationFailure, GenerationFailure, PipelineError, ProviderError, ServiceError,
};
pub use evaluation::EvaluationRunner;
pub use orchestrator::{ExecutionOrchestrator, OrchestratorBuilder, RunState};
pub use provider::ModelProvider;
pub use providers::{gemini::GeminiProvider, openai_compat::OpenAiCompatProvider};
pub use retry::RetryPolicy;
pub use scoring::{score, ScoreWeights};
pub use service::{execute_version, execute_version_until_cancelled, execute_versions};
