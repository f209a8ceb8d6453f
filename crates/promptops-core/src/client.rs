use std::future::Future;
use std::sync::Arc;

use promptops_types::{EvaluationScores, FallbackReason};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::error::{EvaluationFailure, GenerationFailure, PipelineError, ProviderError};
use crate::provider::ModelProvider;
use crate::retry::RetryPolicy;

/// Text produced by a successful `generate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Whole operation, from the first attempt to the successful one.
    pub elapsed_ms: u64,
    pub attempts: u32,
}

/// Result of the structured evaluation call.
#[derive(Debug)]
pub enum EvaluationOutcome {
    Scored(EvaluationScores),
    Fallback(EvaluationFailure),
}

impl EvaluationOutcome {
    /// The scores to record: the model's, or the worst-case triple.
    pub fn scores(&self) -> EvaluationScores {
        match self {
            EvaluationOutcome::Scored(scores) => *scores,
            EvaluationOutcome::Fallback(_) => EvaluationScores::FALLBACK,
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            EvaluationOutcome::Scored(_) => None,
            EvaluationOutcome::Fallback(failure) => Some(failure.reason()),
        }
    }
}

/// JSON schema the evaluation model must answer with.
pub fn evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "accuracy": { "type": "number" },
            "clarity": { "type": "number" },
            "hallucination_risk": { "type": "number" }
        },
        "required": ["accuracy", "clarity", "hallucination_risk"],
        "propertyOrdering": ["accuracy", "clarity", "hallucination_risk"]
    })
}

pub fn evaluation_instruction(prompt: &str, response: &str) -> String {
    format!(
        r#"You are an expert AI quality auditor. Evaluate the following LLM response based on the provided prompt.

Prompt: "{prompt}"
Response: "{response}"

Provide scores (0-100) for:
- accuracy: How factual and correct the response is.
- clarity: How clear, well-structured, and easy to understand the response is.
- hallucination_risk: The risk that the model invented facts or deviated from the prompt context (0 means no hallucination, 100 means complete hallucination).

Respond with a JSON object containing exactly the numeric fields accuracy, clarity, hallucination_risk."#
    )
}

/// Wraps a `ModelProvider` with the pipeline's reliability rules.
///
/// Generation is retried according to `RetryPolicy`. Evaluation gets a
/// single attempt and degrades to a fallback instead of failing.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn ModelProvider>,
    generation_model: String,
    evaluation_model: String,
    retry: RetryPolicy,
}

impl ModelClient {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        generation_model: impl Into<String>,
        evaluation_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            generation_model: generation_model.into(),
            evaluation_model: evaluation_model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn generation_model(&self) -> &str {
        &self.generation_model
    }

    pub fn evaluation_model(&self) -> &str {
        &self.evaluation_model
    }

    pub async fn generate(&self, prompt: &str) -> Result<Generation, GenerationFailure> {
        let started = Instant::now();
        let provider = self.provider.as_ref();
        let model = self.generation_model.as_str();

        let result = self
            .retry
            .run(move |attempt| async move {
                tracing::debug!(provider = provider.name(), model, attempt, "requesting generation");
                let text = provider.generate(model, prompt).await?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(ProviderError::EmptyResponse);
                }
                Ok(text.to_string())
            })
            .await;

        match result {
            Ok((text, attempts)) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(model, attempts, elapsed_ms, "generation succeeded");
                Ok(Generation {
                    text,
                    elapsed_ms,
                    attempts,
                })
            }
            Err(exhausted) => {
                tracing::error!(
                    model,
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "generation failed"
                );
                Err(GenerationFailure {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                })
            }
        }
    }

    /// `generate`, abandoned as soon as `cancel` resolves.
    ///
    /// Dropping the in-flight call also drops any pending backoff, so no
    /// further attempts are issued after cancellation.
    pub async fn generate_until_cancelled<C>(
        &self,
        prompt: &str,
        cancel: C,
    ) -> Result<Generation, PipelineError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(model = %self.generation_model, "generation cancelled");
                Err(PipelineError::Cancelled)
            }
            result = self.generate(prompt) => result.map_err(PipelineError::from),
        }
    }

    /// Score `response` against `prompt`. Never fails: problems become a fallback.
    pub async fn evaluate_structured(&self, prompt: &str, response: &str) -> EvaluationOutcome {
        let instruction = evaluation_instruction(prompt, response);
        let raw = match self
            .provider
            .generate_structured(&self.evaluation_model, &instruction, &evaluation_schema())
            .await
        {
            Ok(raw) => raw,
            // The call went through but the body held no usable payload.
            Err(err @ (ProviderError::EmptyResponse | ProviderError::Parse(_))) => {
                return EvaluationOutcome::Fallback(EvaluationFailure::MalformedPayload(err.to_string()))
            }
            Err(err) => return EvaluationOutcome::Fallback(EvaluationFailure::CallFailed(err)),
        };

        match parse_scores(&raw) {
            Ok(scores) => EvaluationOutcome::Scored(scores),
            Err(failure) => EvaluationOutcome::Fallback(failure),
        }
    }
}

/// Parse the evaluation payload.
///
/// Accepts the bare object, or an object embedded in surrounding text such
/// as a fenced code block.
fn parse_scores(raw: &str) -> Result<EvaluationScores, EvaluationFailure> {
    let trimmed = raw.trim();
    match serde_json::from_str::<EvaluationScores>(trimmed) {
        Ok(scores) => Ok(scores),
        Err(err) => {
            let embedded = match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if start < end && (start > 0 || end + 1 < trimmed.len()) => {
                    Some(&trimmed[start..=end])
                }
                _ => None,
            };
            embedded
                .and_then(|obj| serde_json::from_str::<EvaluationScores>(obj).ok())
                .ok_or_else(|| EvaluationFailure::MalformedPayload(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use std::time::Duration;

    fn client(provider: Arc<ScriptedProvider>) -> ModelClient {
        ModelClient::new(provider, "gen-model", "eval-model")
    }

    #[test]
    fn test_parse_scores_variants() {
        let s = parse_scores(" {\"accuracy\": 90, \"clarity\": 85.5, \"hallucination_risk\": 5}\n").unwrap();
        assert_eq!(s.clarity, 85.5);

        let fenced = "```json\n{\"accuracy\": 1, \"clarity\": 2, \"hallucination_risk\": 3}\n```";
        assert_eq!(parse_scores(fenced).unwrap().hallucination_risk, 3.0);

        assert!(matches!(
            parse_scores("{\"accuracy\": 90, \"clarity\": 85}"),
            Err(EvaluationFailure::MalformedPayload(_))
        ));
        assert!(matches!(parse_scores("not json"), Err(EvaluationFailure::MalformedPayload(_))));
        assert!(matches!(parse_scores(""), Err(EvaluationFailure::MalformedPayload(_))));
        assert!(matches!(
            parse_scores("{\"accuracy\": \"high\", \"clarity\": 1, \"hallucination_risk\": 1}"),
            Err(EvaluationFailure::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_out_of_range_scores_are_kept() {
        let s = parse_scores("{\"accuracy\": 140, \"clarity\": -3, \"hallucination_risk\": 0}").unwrap();
        assert_eq!((s.accuracy, s.clarity), (140.0, -3.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_retries_then_succeeds() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .generate_err(ProviderError::Request("connection reset".into()))
                .generate_ok("   ")
                .generate_ok("A summary."),
        );
        let generation = client(provider.clone()).generate("Summarize: ...").await.unwrap();

        assert_eq!(generation.text, "A summary.");
        assert_eq!(generation.attempts, 3);
        assert!(generation.elapsed_ms >= 3000);
        assert_eq!(provider.generate_calls(), 3);
        assert!(provider.calls().iter().all(|c| c.model == "gen-model"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_exhausts_with_last_error() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .generate_err(ProviderError::Request("timeout".into()))
                .generate_err(ProviderError::Request("timeout".into()))
                .generate_err(ProviderError::Api {
                    status: 500,
                    message: "internal".into(),
                }),
        );
        let failure = client(provider.clone()).generate("hi").await.unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert!(matches!(failure.last_error, ProviderError::Api { status: 500, .. }));
        assert_eq!(provider.generate_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_measures_provider_latency() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .latency(Duration::from_millis(420))
                .generate_ok("A summary."),
        );
        let generation = client(provider).generate("Summarize: ...").await.unwrap();
        assert_eq!(generation.attempts, 1);
        assert!(generation.elapsed_ms >= 420);
        assert!(generation.elapsed_ms < 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_attempts() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .generate_err(ProviderError::Request("timeout".into()))
                .generate_ok("too late"),
        );
        let c = client(provider.clone());
        let cancel = tokio::time::sleep(Duration::from_millis(500));

        let result = c.generate_until_cancelled("hi", cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_uses_evaluation_model_and_schema() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .structured_ok("{\"accuracy\": 90, \"clarity\": 85, \"hallucination_risk\": 5}"),
        );
        let outcome = client(provider.clone())
            .evaluate_structured("Summarize: ...", "A summary.")
            .await;

        assert_eq!(
            outcome.scores(),
            EvaluationScores {
                accuracy: 90.0,
                clarity: 85.0,
                hallucination_risk: 5.0
            }
        );
        assert_eq!(outcome.fallback_reason(), None);
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "eval-model");
        assert!(calls[0].prompt.contains("quality auditor"));
        assert!(calls[0].prompt.contains("A summary."));
        let schema = calls[0].schema.as_ref().unwrap();
        assert_eq!(
            schema["required"],
            json!(["accuracy", "clarity", "hallucination_risk"])
        );
    }

    #[tokio::test]
    async fn test_evaluate_falls_back_without_retry() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .structured_err(ProviderError::Request("timeout".into()))
                .structured_ok("{\"accuracy\": 90, \"clarity\": 85, \"hallucination_risk\": 5}"),
        );
        let c = client(provider.clone());

        let outcome = c.evaluate_structured("p", "r").await;
        assert_eq!(outcome.scores(), EvaluationScores::FALLBACK);
        assert_eq!(outcome.fallback_reason(), Some(FallbackReason::CallFailed));
        assert_eq!(provider.structured_calls(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_empty_or_unreadable_body_is_malformed() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .structured_err(ProviderError::EmptyResponse)
                .structured_err(ProviderError::Parse("response has no content parts (no candidates)".into()))
                .structured_err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".into(),
                }),
        );
        let c = client(provider);

        let empty = c.evaluate_structured("p", "r").await;
        assert_eq!(empty.scores(), EvaluationScores::FALLBACK);
        assert_eq!(empty.fallback_reason(), Some(FallbackReason::MalformedPayload));

        let no_candidates = c.evaluate_structured("p", "r").await;
        assert_eq!(no_candidates.fallback_reason(), Some(FallbackReason::MalformedPayload));

        let api = c.evaluate_structured("p", "r").await;
        assert_eq!(api.fallback_reason(), Some(FallbackReason::CallFailed));
    }

    #[tokio::test]
    async fn test_evaluate_malformed_payload() {
        let provider = Arc::new(ScriptedProvider::new().structured_ok("{\"accuracy\": 90}"));
        let outcome = client(provider).evaluate_structured("p", "r").await;
        assert_eq!(outcome.scores(), EvaluationScores::FALLBACK);
        assert_eq!(outcome.fallback_reason(), Some(FallbackReason::MalformedPayload));
    }
}
