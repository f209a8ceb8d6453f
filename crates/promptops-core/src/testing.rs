//! Helpers for testing code built on the pipeline without a real provider.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use promptops_types::{Evaluation, Metrics};
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::ModelProvider;

/// One call received by a `ScriptedProvider`.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    /// Set for structured calls.
    pub schema: Option<Value>,
}

/// `ModelProvider` that replays queued responses in order.
///
/// When a queue runs dry the call fails with `ProviderError::Request`.
///
/// # Example
/// ```ignore
/// let provider = Arc::new(
///     ScriptedProvider::new()
///         .generate_ok("A summary.")
///         .structured_ok(r#"{"accuracy": 90, "clarity": 85, "hallucination_risk": 5}"#),
/// );
/// let client = ModelClient::new(provider, "gen", "eval");
/// ```
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    generate: Mutex<VecDeque<Result<String, ProviderError>>>,
    structured: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_ok(self, text: impl Into<String>) -> Self {
        self.push_generate(Ok(text.into()))
    }

    pub fn generate_err(self, err: ProviderError) -> Self {
        self.push_generate(Err(err))
    }

    pub fn structured_ok(self, raw: impl Into<String>) -> Self {
        self.push_structured(Ok(raw.into()))
    }

    pub fn structured_err(self, err: ProviderError) -> Self {
        self.push_structured(Err(err))
    }

    /// Simulated duration of every free-text generation call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn generate_calls(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.schema.is_none()).count()
    }

    pub fn structured_calls(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.schema.is_some()).count()
    }

    fn push_generate(self, item: Result<String, ProviderError>) -> Self {
        lock(&self.generate).push_back(item);
        self
    }

    fn push_structured(self, item: Result<String, ProviderError>) -> Self {
        lock(&self.structured).push_back(item);
        self
    }

    fn record(&self, model: &str, prompt: &str, schema: Option<&Value>) {
        lock(&self.calls).push(RecordedCall {
            model: model.to_string(),
            prompt: prompt.to_string(),
            schema: schema.cloned(),
        });
    }
}

// A panic inside a test already fails it; keep replaying after poisoning.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn exhausted(kind: &str) -> ProviderError {
    ProviderError::Request(format!("scripted {kind} responses exhausted"))
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        self.record(model, prompt, None);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = lock(&self.generate).pop_front();
        next.unwrap_or_else(|| Err(exhausted("generate")))
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
    ) -> Result<String, ProviderError> {
        self.record(model, prompt, Some(schema));
        let next = lock(&self.structured).pop_front();
        next.unwrap_or_else(|| Err(exhausted("structured")))
    }
}

/// Fail unless the evaluation came from the model rather than the fallback.
pub fn assert_scored_by_model(evaluation: &Evaluation) -> Result<()> {
    if evaluation.is_fallback() {
        anyhow::bail!(
            "Evaluation {} used fallback scores: {:?}",
            evaluation.id,
            evaluation.source
        );
    }
    Ok(())
}

/// Fail unless the average overall score meets a threshold.
///
/// Use this in your `#[tokio::test]` functions to gate a prompt version.
pub fn assert_min_avg_overall(metrics: Option<&Metrics>, min_avg_overall: f64) -> Result<()> {
    let Some(metrics) = metrics else {
        anyhow::bail!("No evaluations recorded yet");
    };
    if metrics.avg_overall < min_avg_overall {
        anyhow::bail!(
            "Average overall score {:.1} is below threshold {:.1}\n{}",
            metrics.avg_overall,
            min_avg_overall,
            metrics.summary_line()
        );
    }
    Ok(())
}
