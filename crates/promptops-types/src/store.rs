use thiserror::Error;

use crate::{Evaluation, Execution, ExecutionRecord, Prompt, PromptVersion};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store for prompts, their versions, and pipeline results.
///
/// The pipeline never touches a store directly; callers pass one in
/// explicitly and persist a run's `(execution, evaluation)` pair in a single
/// `save_execution` call.
pub trait PromptStore: Send + Sync {
    fn create_prompt(&self, name: &str, description: &str) -> StoreResult<Prompt>;

    fn list_prompts(&self) -> StoreResult<Vec<Prompt>>;

    /// Append a version. Its number is the count of existing versions + 1.
    fn create_version(&self, prompt_id: &str, content: &str) -> StoreResult<PromptVersion>;

    /// Versions of one prompt, ascending by version number.
    fn list_versions(&self, prompt_id: &str) -> StoreResult<Vec<PromptVersion>>;

    fn get_version(&self, version_id: &str) -> StoreResult<PromptVersion>;

    /// Persist an execution and its evaluation atomically.
    fn save_execution(&self, execution: &Execution, evaluation: &Evaluation) -> StoreResult<()>;

    /// Execution history, newest first.
    fn list_executions(&self) -> StoreResult<Vec<ExecutionRecord>>;

    /// All evaluations, newest first.
    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>>;
}
