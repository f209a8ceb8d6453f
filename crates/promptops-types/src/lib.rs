use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

pub mod store;

pub use store::{PromptStore, StoreError, StoreResult};

/// A named, reusable instruction template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of a prompt's content.
///
/// `version_number` starts at 1 and grows by one for every version created
/// under the same prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub prompt_id: String,
    pub version_number: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One successful run of a prompt version against the generation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub prompt_version_id: String,
    pub response_text: String,
    /// Wall-clock duration of the generation call, retries included.
    pub response_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Raw dimension scores as returned by the evaluation model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub accuracy: f64,
    pub clarity: f64,
    pub hallucination_risk: f64,
}

impl EvaluationScores {
    /// Worst-case triple substituted when automated scoring fails.
    pub const FALLBACK: EvaluationScores = EvaluationScores {
        accuracy: 0.0,
        clarity: 0.0,
        hallucination_risk: 100.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The provider call itself failed (network, API error, timeout).
    CallFailed,
    /// The call returned, but the payload was not the expected JSON object.
    MalformedPayload,
}

/// Where an evaluation's scores came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationSource {
    Model,
    Fallback { reason: FallbackReason, detail: String },
}

/// Automated quality assessment of exactly one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub execution_id: String,
    pub accuracy: f64,
    pub clarity: f64,
    pub hallucination_risk: f64,
    pub overall_score: f64,
    pub source: EvaluationSource,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn scores(&self) -> EvaluationScores {
        EvaluationScores {
            accuracy: self.accuracy,
            clarity: self.clarity,
            hallucination_risk: self.hallucination_risk,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, EvaluationSource::Fallback { .. })
    }
}

/// Result of one orchestrated run: both records, ready to persist together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub execution: Execution,
    pub evaluation: Evaluation,
}

/// Evaluation attached to a stored execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "evaluation", rename_all = "snake_case")]
pub enum EvaluationState {
    Scored(Evaluation),
    /// Only reachable for records written outside the pipeline.
    Missing,
}

impl EvaluationState {
    pub fn as_scored(&self) -> Option<&Evaluation> {
        match self {
            EvaluationState::Scored(evaluation) => Some(evaluation),
            EvaluationState::Missing => None,
        }
    }
}

/// History row: an execution joined with its version and evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution: Execution,
    pub prompt_name: String,
    pub version_number: u32,
    pub evaluation: EvaluationState,
}

/// Summary statistics over a set of evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub avg_accuracy: f64,
    pub avg_clarity: f64,
    pub avg_hallucination_risk: f64,
    pub avg_overall: f64,
    pub total_executions: usize,
}

/// Metrics restricted to the executions of one prompt version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetrics {
    pub prompt_version_id: String,
    pub prompt_name: String,
    pub version_number: u32,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct HistoryRow {
    id: String,
    prompt: String,
    version: String,
    time_ms: u64,
    accuracy: String,
    clarity: String,
    hallucination: String,
    overall: String,
    response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
struct VersionRow {
    prompt: String,
    version: String,
    runs: usize,
    accuracy: String,
    clarity: String,
    hallucination: String,
    overall: String,
}

impl Metrics {
    pub fn summary_line(&self) -> String {
        format!(
            "Executions: {}  Avg accuracy: {:.1}  Avg clarity: {:.1}  Avg hallucination risk: {:.1}  Avg overall: {:.1}",
            self.total_executions,
            self.avg_accuracy,
            self.avg_clarity,
            self.avg_hallucination_risk,
            self.avg_overall
        )
    }
}

/// Render execution history as a table, newest rows first as given.
///
/// Fallback evaluations are flagged with `*` next to the overall score.
pub fn history_table(records: &[ExecutionRecord]) -> String {
    let rows: Vec<HistoryRow> = records
        .iter()
        .map(|record| {
            let (accuracy, clarity, hallucination, overall) = match &record.evaluation {
                EvaluationState::Scored(ev) => {
                    let marker = if ev.is_fallback() { "*" } else { "" };
                    (
                        format!("{:.1}", ev.accuracy),
                        format!("{:.1}", ev.clarity),
                        format!("{:.1}", ev.hallucination_risk),
                        format!("{:.1}{}", ev.overall_score, marker),
                    )
                }
                EvaluationState::Missing => ("-".into(), "-".into(), "-".into(), "-".into()),
            };
            HistoryRow {
                id: truncate(record.execution.id.clone(), 9),
                prompt: truncate(record.prompt_name.clone(), 24),
                version: format!("v{}", record.version_number),
                time_ms: record.execution.response_time_ms,
                accuracy,
                clarity,
                hallucination,
                overall,
                response: truncate(single_line(&record.execution.response_text), 48),
            }
        })
        .collect();

    let fallbacks = records
        .iter()
        .filter_map(|r| r.evaluation.as_scored())
        .filter(|ev| ev.is_fallback())
        .count();

    let mut out = Table::new(rows).to_string();
    if fallbacks > 0 {
        out.push_str(&format!(
            "\n\n* {} evaluation(s) used the fallback scores (0 / 0 / 100)",
            fallbacks
        ));
    }
    out.push('\n');
    out
}

/// Render per-version metrics followed by the overall summary line.
pub fn metrics_table(overall: &Metrics, versions: &[VersionMetrics]) -> String {
    let rows: Vec<VersionRow> = versions
        .iter()
        .map(|vm| VersionRow {
            prompt: truncate(vm.prompt_name.clone(), 32),
            version: format!("v{}", vm.version_number),
            runs: vm.metrics.total_executions,
            accuracy: format!("{:.1}", vm.metrics.avg_accuracy),
            clarity: format!("{:.1}", vm.metrics.avg_clarity),
            hallucination: format!("{:.1}", vm.metrics.avg_hallucination_risk),
            overall: format!("{:.1}", vm.metrics.avg_overall),
        })
        .collect();

    format!("{}\n\n{}\n", Table::new(rows), overall.summary_line())
}

fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: String, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s;
    }
    let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
    truncated.push('…');
    truncated
}
