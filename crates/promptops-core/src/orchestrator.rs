use std::fmt;
use std::future::Future;

use anyhow::Result;
use chrono::Utc;
use promptops_types::{Execution, PromptVersion, RunOutcome};
use uuid::Uuid;

use crate::client::ModelClient;
use crate::error::PipelineError;
use crate::evaluation::EvaluationRunner;
use crate::scoring::ScoreWeights;

/// Lifecycle of a single run. Only `Failed` and `Completed` are visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
	Pending,
	Generating,
	Generated,
	Evaluating,
	Completed,
	Failed,
}

impl fmt::Display for RunState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			RunState::Pending => "pending",
			RunState::Generating => "generating",
			RunState::Generated => "generated",
			RunState::Evaluating => "evaluating",
			RunState::Completed => "completed",
			RunState::Failed => "failed",
		};
		f.write_str(s)
	}
}

pub struct OrchestratorBuilder {
	client: Option<ModelClient>,
	weights: ScoreWeights,
}

impl OrchestratorBuilder {
	pub fn new() -> Self {
		Self {
			client: None,
			weights: ScoreWeights::default(),
		}
	}

	pub fn client(mut self, client: ModelClient) -> Self {
		self.client = Some(client);
		self
	}

	pub fn weights(mut self, weights: ScoreWeights) -> Self {
		self.weights = weights;
		self
	}

	pub fn build(self) -> Result<ExecutionOrchestrator> {
		let client = self.client.ok_or_else(|| anyhow::anyhow!("client must be set"))?;
		Ok(ExecutionOrchestrator {
			evaluator: EvaluationRunner::new(client.clone()).with_weights(self.weights),
			client,
		})
	}
}

impl Default for OrchestratorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Runs a prompt version: generate, then evaluate, then hand both records back.
///
/// Holds no mutable state, so one instance can serve concurrent runs.
/// Persisting the outcome is the caller's job.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
	client: ModelClient,
	evaluator: EvaluationRunner,
}

impl ExecutionOrchestrator {
	pub fn builder() -> OrchestratorBuilder {
		OrchestratorBuilder::new()
	}

	pub fn client(&self) -> &ModelClient {
		&self.client
	}

	pub async fn run(&self, version: &PromptVersion) -> Result<RunOutcome, PipelineError> {
		let mut state = RunState::Pending;
		let mut advance = |next: RunState| {
			tracing::debug!(version_id = %version.id, from = %state, to = %next, "run state");
			state = next;
		};

		if version.content.trim().is_empty() {
			advance(RunState::Failed);
			return Err(PipelineError::MalformedInput(format!(
				"prompt version {} has empty content",
				version.id
			)));
		}

		advance(RunState::Generating);
		let generation = match self.client.generate(&version.content).await {
			Ok(generation) => generation,
			Err(failure) => {
				advance(RunState::Failed);
				return Err(failure.into());
			}
		};
		advance(RunState::Generated);

		let execution = Execution {
			id: Uuid::new_v4().to_string(),
			prompt_version_id: version.id.clone(),
			response_text: generation.text,
			response_time_ms: generation.elapsed_ms,
			created_at: Utc::now(),
		};

		advance(RunState::Evaluating);
		let evaluation = self
			.evaluator
			.evaluate(&execution.id, &version.content, &execution.response_text)
			.await;
		advance(RunState::Completed);

		tracing::info!(
			version_id = %version.id,
			execution_id = %execution.id,
			response_time_ms = execution.response_time_ms,
			overall_score = evaluation.overall_score,
			fallback = evaluation.is_fallback(),
			"run completed"
		);
		Ok(RunOutcome {
			execution,
			evaluation,
		})
	}

	/// `run`, abandoned with `PipelineError::Cancelled` once `cancel` resolves.
	pub async fn run_until_cancelled<C>(
		&self,
		version: &PromptVersion,
		cancel: C,
	) -> Result<RunOutcome, PipelineError>
	where
		C: Future<Output = ()>,
	{
		tokio::select! {
			biased;
			_ = cancel => {
				tracing::info!(version_id = %version.id, "run cancelled");
				Err(PipelineError::Cancelled)
			}
			result = self.run(version) => result,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ProviderError;
	use crate::testing::ScriptedProvider;
	use std::sync::Arc;
	use std::time::Duration;

	fn version(content: &str) -> PromptVersion {
		PromptVersion {
			id: "pv-1".into(),
			prompt_id: "p-1".into(),
			version_number: 1,
			content: content.into(),
			created_at: Utc::now(),
		}
	}

	fn orchestrator(provider: Arc<ScriptedProvider>) -> ExecutionOrchestrator {
		ExecutionOrchestrator::builder()
			.client(ModelClient::new(provider, "gen", "eval"))
			.build()
			.unwrap()
	}

	#[test]
	fn test_builder_requires_client() {
		assert!(ExecutionOrchestrator::builder().build().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn test_end_to_end_scenario() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.latency(Duration::from_millis(420))
				.generate_ok("A summary.")
				.structured_ok(r#"{"accuracy": 90, "clarity": 85, "hallucination_risk": 5}"#),
		);
		let outcome = orchestrator(provider).run(&version("Summarize: ...")).await.unwrap();

		assert_eq!(outcome.execution.prompt_version_id, "pv-1");
		assert_eq!(outcome.execution.response_text, "A summary.");
		assert_eq!(outcome.execution.response_time_ms, 420);
		assert_eq!(outcome.evaluation.execution_id, outcome.execution.id);
		assert_eq!(outcome.evaluation.overall_score, 89.5);
		assert!(!outcome.evaluation.is_fallback());
	}

	#[tokio::test]
	async fn test_empty_content_rejected_before_any_call() {
		let provider = Arc::new(ScriptedProvider::new().generate_ok("unused"));
		let err = orchestrator(provider.clone()).run(&version("  \n")).await.unwrap_err();

		assert!(matches!(err, PipelineError::MalformedInput(_)));
		assert!(provider.calls().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_generation_failure_skips_evaluation() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.generate_err(ProviderError::Request("timeout".into()))
				.generate_err(ProviderError::Request("timeout".into()))
				.generate_err(ProviderError::EmptyResponse)
				.structured_ok(r#"{"accuracy": 90, "clarity": 85, "hallucination_risk": 5}"#),
		);
		let err = orchestrator(provider.clone()).run(&version("hi")).await.unwrap_err();

		match err {
			PipelineError::Generation(failure) => assert_eq!(failure.attempts, 3),
			other => panic!("unexpected: {other:?}"),
		}
		assert_eq!(provider.structured_calls(), 0);
	}

	#[tokio::test]
	async fn test_evaluation_failure_still_completes() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.generate_ok("A summary.")
				.structured_ok("{oops"),
		);
		let outcome = orchestrator(provider).run(&version("Summarize: ...")).await.unwrap();

		assert_eq!(outcome.execution.response_text, "A summary.");
		assert!(outcome.evaluation.is_fallback());
		assert_eq!(outcome.evaluation.overall_score, 0.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancelled_run_returns_no_records() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.generate_err(ProviderError::Request("timeout".into()))
				.generate_ok("A summary."),
		);
		let o = orchestrator(provider.clone());
		let result = o
			.run_until_cancelled(&version("hi"), tokio::time::sleep(Duration::from_millis(200)))
			.await;

		assert!(matches!(result, Err(PipelineError::Cancelled)));
		assert_eq!(provider.generate_calls(), 1);
	}

	#[tokio::test]
	async fn test_concurrent_runs_are_independent() {
		let provider = Arc::new(
			ScriptedProvider::new()
				.generate_ok("one")
				.generate_ok("two")
				.structured_ok(r#"{"accuracy": 100, "clarity": 100, "hallucination_risk": 0}"#)
				.structured_ok(r#"{"accuracy": 100, "clarity": 100, "hallucination_risk": 0}"#),
		);
		let o = orchestrator(provider);
		let v = version("go");
		let (a, b) = tokio::join!(o.run(&v), o.run(&v));
		let (a, b) = (a.unwrap(), b.unwrap());

		assert_ne!(a.execution.id, b.execution.id);
		assert_eq!(a.evaluation.overall_score, 100.0);
		assert_eq!(b.evaluation.overall_score, 100.0);
	}
}
