use std::collections::BTreeMap;

use promptops_types::{Evaluation, ExecutionRecord, Metrics, VersionMetrics};

/// Unweighted means over `evaluations`. `None` means no data yet, which is
/// different from every run having scored zero.
pub fn aggregate(evaluations: &[Evaluation]) -> Option<Metrics> {
    if evaluations.is_empty() {
        return None;
    }
    let n = evaluations.len() as f64;
    let mean = |f: fn(&Evaluation) -> f64| evaluations.iter().map(f).sum::<f64>() / n;

    Some(Metrics {
        avg_accuracy: mean(|e| e.accuracy),
        avg_clarity: mean(|e| e.clarity),
        avg_hallucination_risk: mean(|e| e.hallucination_risk),
        avg_overall: mean(|e| e.overall_score),
        total_executions: evaluations.len(),
    })
}

/// Per-version rollup of scored history rows, ordered by prompt name then version.
///
/// Rows without an evaluation are skipped.
pub fn aggregate_by_version(records: &[ExecutionRecord]) -> Vec<VersionMetrics> {
    let mut groups: BTreeMap<(String, u32, String), Vec<Evaluation>> = BTreeMap::new();
    for record in records {
        if let Some(evaluation) = record.evaluation.as_scored() {
            groups
                .entry((
                    record.prompt_name.clone(),
                    record.version_number,
                    record.execution.prompt_version_id.clone(),
                ))
                .or_default()
                .push(evaluation.clone());
        }
    }

    groups
        .into_iter()
        .filter_map(|((prompt_name, version_number, prompt_version_id), evaluations)| {
            aggregate(&evaluations).map(|metrics| VersionMetrics {
                prompt_version_id,
                prompt_name,
                version_number,
                metrics,
            })
        })
        .collect()
}
