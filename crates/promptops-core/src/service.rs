use std::future::Future;

use futures::stream::{self, StreamExt};
use promptops_types::store::{PromptStore, StoreError};
use promptops_types::{Metrics, RunOutcome, VersionMetrics};

use crate::error::{PipelineError, ServiceError};
use crate::metrics;
use crate::orchestrator::ExecutionOrchestrator;

/// Look up a version, run it, and persist the outcome.
///
/// Nothing is written unless the run produced both records.
pub async fn execute_version(
	store: &dyn PromptStore,
	orchestrator: &ExecutionOrchestrator,
	version_id: &str,
) -> Result<RunOutcome, ServiceError> {
	execute_version_until_cancelled(store, orchestrator, version_id, std::future::pending()).await
}

/// `execute_version` that stops without persisting once `cancel` resolves.
pub async fn execute_version_until_cancelled<C>(
	store: &dyn PromptStore,
	orchestrator: &ExecutionOrchestrator,
	version_id: &str,
	cancel: C,
) -> Result<RunOutcome, ServiceError>
where
	C: Future<Output = ()>,
{
	let version = store.get_version(version_id)?;
	let outcome = orchestrator.run_until_cancelled(&version, cancel).await?;
	store.save_execution(&outcome.execution, &outcome.evaluation)?;
	tracing::debug!(
		version_id,
		execution_id = %outcome.execution.id,
		"execution persisted"
	);
	Ok(outcome)
}

/// Run several versions with at most `concurrency` in flight.
///
/// Results come back in input order. One failed run does not stop the others.
pub async fn execute_versions(
	store: &dyn PromptStore,
	orchestrator: &ExecutionOrchestrator,
	version_ids: &[String],
	concurrency: usize,
) -> Vec<Result<RunOutcome, ServiceError>> {
	stream::iter(version_ids.iter())
		.map(|version_id| execute_version(store, orchestrator, version_id))
		.buffered(concurrency.max(1))
		.collect()
		.await
}

/// Averages over every stored evaluation. `None` until something has run.
pub fn metrics(store: &dyn PromptStore) -> Result<Option<Metrics>, StoreError> {
	Ok(metrics::aggregate(&store.list_evaluations()?))
}

pub fn version_metrics(store: &dyn PromptStore) -> Result<Vec<VersionMetrics>, StoreError> {
	Ok(metrics::aggregate_by_version(&store.list_executions()?))
}

impl ServiceError {
	/// True when the failure happened before or during the run, not in the store.
	pub fn is_pipeline(&self) -> bool {
		matches!(self, ServiceError::Pipeline(_))
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, ServiceError::Pipeline(PipelineError::Cancelled))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::ModelClient;
	use crate::error::ProviderError;
	use crate::retry::RetryPolicy;
	use crate::testing::ScriptedProvider;
	use promptops_store::MemoryStore;
	use std::sync::Arc;
	use std::time::Duration;

	const GOOD: &str = r#"{"accuracy": 90, "clarity": 85, "hallucination_risk": 5}"#;

	fn orchestrator(provider: ScriptedProvider) -> ExecutionOrchestrator {
		let client = ModelClient::new(Arc::new(provider), "gen", "eval")
			.with_retry(RetryPolicy::new(2, Duration::from_millis(10)));
		ExecutionOrchestrator::builder().client(client).build().unwrap()
	}

	fn seeded_store(content: &str) -> (MemoryStore, String) {
		let store = MemoryStore::new();
		let prompt = store.create_prompt("summarizer", "").unwrap();
		let version = store.create_version(&prompt.id, content).unwrap();
		(store, version.id)
	}

	#[tokio::test]
	async fn test_execute_persists_pair() {
		let (store, version_id) = seeded_store("Summarize: ...");
		let o = orchestrator(ScriptedProvider::new().generate_ok("A summary.").structured_ok(GOOD));

		let outcome = execute_version(&store, &o, &version_id).await.unwrap();

		let history = store.list_executions().unwrap();
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].execution.id, outcome.execution.id);
		assert_eq!(history[0].version_number, 1);
		let stored = history[0].evaluation.as_scored().unwrap();
		assert_eq!(stored.overall_score, 89.5);

		let m = metrics(&store).unwrap().unwrap();
		assert_eq!(m.total_executions, 1);
		assert_eq!(m.avg_overall, 89.5);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failed_generation_persists_nothing() {
		let (store, version_id) = seeded_store("Summarize: ...");
		let o = orchestrator(
			ScriptedProvider::new()
				.generate_err(ProviderError::Request("timeout".into()))
				.generate_err(ProviderError::Request("timeout".into())),
		);

		let err = execute_version(&store, &o, &version_id).await.unwrap_err();

		assert!(err.is_pipeline());
		assert!(store.list_executions().unwrap().is_empty());
		assert_eq!(metrics(&store).unwrap(), None);
	}

	#[tokio::test]
	async fn test_unknown_version() {
		let store = MemoryStore::new();
		let o = orchestrator(ScriptedProvider::new());

		let err = execute_version(&store, &o, "missing").await.unwrap_err();
		assert!(matches!(err, ServiceError::Store(StoreError::NotFound { .. })));
	}

	#[tokio::test]
	async fn test_cancelled_persists_nothing() {
		let (store, version_id) = seeded_store("hi");
		let o = orchestrator(ScriptedProvider::new().generate_ok("A summary.").structured_ok(GOOD));

		let err = execute_version_until_cancelled(&store, &o, &version_id, async {})
			.await
			.unwrap_err();

		assert!(err.is_cancelled());
		assert!(store.list_evaluations().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_execute_versions_keeps_order() {
		let (store, v1) = seeded_store("v1");
		let o = orchestrator(
			ScriptedProvider::new()
				.generate_ok("a")
				.generate_ok("b")
				.structured_ok(GOOD)
				.structured_ok(GOOD),
		);
		let ids = vec![v1.clone(), "missing".to_string(), v1.clone()];

		let results = execute_versions(&store, &o, &ids, 2).await;

		assert_eq!(results.len(), 3);
		assert!(results[0].is_ok());
		assert!(matches!(results[1], Err(ServiceError::Store(StoreError::NotFound { .. }))));
		assert!(results[2].is_ok());
		assert_eq!(store.list_executions().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_version_metrics() {
		let (store, v1) = seeded_store("v1");
		let prompt_id = store.get_version(&v1).unwrap().prompt_id;
		let v2 = store.create_version(&prompt_id, "v2").unwrap().id;
		let o = orchestrator(
			ScriptedProvider::new()
				.generate_ok("a")
				.generate_ok("b")
				.structured_ok(GOOD)
				.structured_ok("not json"),
		);

		execute_version(&store, &o, &v1).await.unwrap();
		execute_version(&store, &o, &v2).await.unwrap();

		let by_version = version_metrics(&store).unwrap();
		assert_eq!(by_version.len(), 2);
		assert_eq!(by_version[0].metrics.avg_overall, 89.5);
		assert_eq!(by_version[1].version_number, 2);
		assert_eq!(by_version[1].metrics.avg_overall, 0.0);
	}
}
