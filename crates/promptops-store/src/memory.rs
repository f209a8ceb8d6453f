use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use promptops_types::{
    Evaluation, EvaluationState, Execution, ExecutionRecord, Prompt, PromptStore, PromptVersion,
    StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    prompts: Vec<Prompt>,
    versions: Vec<PromptVersion>,
    executions: Vec<Execution>,
    evaluations: Vec<Evaluation>,
}

/// In-process `PromptStore`, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".to_string()))
    }
}

impl PromptStore for MemoryStore {
    fn create_prompt(&self, name: &str, description: &str) -> StoreResult<Prompt> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("prompt name must not be empty".into()));
        }
        let prompt = Prompt {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.state()?.prompts.push(prompt.clone());
        Ok(prompt)
    }

    fn list_prompts(&self) -> StoreResult<Vec<Prompt>> {
        Ok(self.state()?.prompts.clone())
    }

    fn create_version(&self, prompt_id: &str, content: &str) -> StoreResult<PromptVersion> {
        if content.trim().is_empty() {
            return Err(StoreError::InvalidInput("version content must not be empty".into()));
        }
        let mut state = self.state()?;
        if !state.prompts.iter().any(|p| p.id == prompt_id) {
            return Err(StoreError::NotFound {
                entity: "prompt",
                id: prompt_id.to_string(),
            });
        }
        let existing = state.versions.iter().filter(|v| v.prompt_id == prompt_id).count();
        let version = PromptVersion {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            version_number: existing as u32 + 1,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state.versions.push(version.clone());
        Ok(version)
    }

    fn list_versions(&self, prompt_id: &str) -> StoreResult<Vec<PromptVersion>> {
        let mut versions: Vec<PromptVersion> = self
            .state()?
            .versions
            .iter()
            .filter(|v| v.prompt_id == prompt_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    fn get_version(&self, version_id: &str) -> StoreResult<PromptVersion> {
        self.state()?
            .versions
            .iter()
            .find(|v| v.id == version_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "prompt version",
                id: version_id.to_string(),
            })
    }

    fn save_execution(&self, execution: &Execution, evaluation: &Evaluation) -> StoreResult<()> {
        if evaluation.execution_id != execution.id {
            return Err(StoreError::InvalidInput(format!(
                "evaluation {} belongs to execution {}, not {}",
                evaluation.id, evaluation.execution_id, execution.id
            )));
        }
        let mut state = self.state()?;
        if !state.versions.iter().any(|v| v.id == execution.prompt_version_id) {
            return Err(StoreError::NotFound {
                entity: "prompt version",
                id: execution.prompt_version_id.clone(),
            });
        }
        state.executions.push(execution.clone());
        state.evaluations.push(evaluation.clone());
        Ok(())
    }

    fn list_executions(&self) -> StoreResult<Vec<ExecutionRecord>> {
        let state = self.state()?;
        let mut records = Vec::with_capacity(state.executions.len());
        for execution in state.executions.iter().rev() {
            let version = state
                .versions
                .iter()
                .find(|v| v.id == execution.prompt_version_id)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "prompt version",
                    id: execution.prompt_version_id.clone(),
                })?;
            let prompt_name = state
                .prompts
                .iter()
                .find(|p| p.id == version.prompt_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let evaluation = state
                .evaluations
                .iter()
                .find(|ev| ev.execution_id == execution.id)
                .cloned()
                .map(EvaluationState::Scored)
                .unwrap_or(EvaluationState::Missing);
            records.push(ExecutionRecord {
                execution: execution.clone(),
                prompt_name,
                version_number: version.version_number,
                evaluation,
            });
        }
        records.sort_by(|a, b| b.execution.created_at.cmp(&a.execution.created_at));
        Ok(records)
    }

    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        let mut evaluations: Vec<Evaluation> =
            self.state()?.evaluations.iter().rev().cloned().collect();
        evaluations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptops_types::EvaluationSource;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let prompt = store.create_prompt("summarizer", "short summaries").unwrap();
        let v1 = store.create_version(&prompt.id, "Summarize: {text}").unwrap();
        let v2 = store.create_version(&prompt.id, "TL;DR: {text}").unwrap();
        assert_eq!((v1.version_number, v2.version_number), (1, 2));

        let execution = Execution {
            id: "ex-1".into(),
            prompt_version_id: v2.id.clone(),
            response_text: "A summary.".into(),
            response_time_ms: 12,
            created_at: Utc::now(),
        };
        let evaluation = Evaluation {
            id: "ev-1".into(),
            execution_id: "ex-1".into(),
            accuracy: 80.0,
            clarity: 80.0,
            hallucination_risk: 20.0,
            overall_score: 80.0,
            source: EvaluationSource::Model,
            created_at: Utc::now(),
        };
        store.save_execution(&execution, &evaluation).unwrap();

        let history = store.list_executions().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version_number, 2);
        assert_eq!(history[0].prompt_name, "summarizer");
        assert_eq!(history[0].evaluation, EvaluationState::Scored(evaluation.clone()));
        assert_eq!(store.list_evaluations().unwrap(), vec![evaluation]);
    }

    #[test]
    fn test_memory_store_unknown_ids() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.create_version("nope", "content"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(store.get_version("nope"), Err(StoreError::NotFound { .. })));
        assert!(store.list_executions().unwrap().is_empty());
    }
}
