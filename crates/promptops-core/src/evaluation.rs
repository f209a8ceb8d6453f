use chrono::Utc;
use promptops_types::{Evaluation, EvaluationSource};
use uuid::Uuid;

use crate::client::{EvaluationOutcome, ModelClient};
use crate::scoring::ScoreWeights;

/// Turns a prompt/response pair into a complete `Evaluation`.
///
/// Always produces a record. A failed or unparsable evaluation call yields
/// the fallback scores, tagged with the reason.
#[derive(Clone)]
pub struct EvaluationRunner {
	client: ModelClient,
	weights: ScoreWeights,
}

impl EvaluationRunner {
	pub fn new(client: ModelClient) -> Self {
		Self {
			client,
			weights: ScoreWeights::default(),
		}
	}

	pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
		self.weights = weights;
		self
	}

	pub fn weights(&self) -> &ScoreWeights {
		&self.weights
	}

	pub async fn evaluate(&self, execution_id: &str, prompt: &str, response: &str) -> Evaluation {
		let outcome = self.client.evaluate_structured(prompt, response).await;
		let scores = outcome.scores();
		let overall_score = self.weights.overall(&scores);

		let source = match outcome {
			EvaluationOutcome::Scored(_) => EvaluationSource::Model,
			EvaluationOutcome::Fallback(failure) => {
				tracing::warn!(
					execution_id,
					reason = ?failure.reason(),
					error = %failure,
					"evaluation failed, recording fallback scores"
				);
				EvaluationSource::Fallback {
					reason: failure.reason(),
					detail: failure.to_string(),
				}
			}
		};

		Evaluation {
			id: Uuid::new_v4().to_string(),
			execution_id: execution_id.to_string(),
			accuracy: scores.accuracy,
			clarity: scores.clarity,
			hallucination_risk: scores.hallucination_risk,
			overall_score,
			source,
			created_at: Utc::now(),
		}
	}
}
