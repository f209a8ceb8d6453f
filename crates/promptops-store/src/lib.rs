use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use promptops_types::{
    Evaluation, EvaluationSource, EvaluationState, Execution, ExecutionRecord, Prompt,
    PromptStore, PromptVersion, StoreError, StoreResult,
};

mod memory;

pub use memory::MemoryStore;

/// SQLite-backed `PromptStore`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a store at the given path (e.g., "promptops.db"), creating the schema if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS prompts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS prompt_versions (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                version_number INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(prompt_id, version_number),
                FOREIGN KEY(prompt_id) REFERENCES prompts(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                prompt_version_id TEXT NOT NULL,
                response_text TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(prompt_version_id) REFERENCES prompt_versions(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS evaluations (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL UNIQUE,
                accuracy REAL NOT NULL,
                clarity REAL NOT NULL,
                hallucination_risk REAL NOT NULL,
                overall_score REAL NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(execution_id) REFERENCES executions(id) ON DELETE CASCADE
            )",
            [],
        )?;

        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

// Fixed-width so that lexical order in SQL matches chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_source(raw: &str) -> StoreResult<EvaluationSource> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Backend(format!("invalid evaluation source {raw:?}: {e}")))
}

struct RawEvaluation {
    id: String,
    execution_id: String,
    accuracy: f64,
    clarity: f64,
    hallucination_risk: f64,
    overall_score: f64,
    source: String,
    created_at: String,
}

impl RawEvaluation {
    fn into_evaluation(self) -> StoreResult<Evaluation> {
        Ok(Evaluation {
            id: self.id,
            execution_id: self.execution_id,
            accuracy: self.accuracy,
            clarity: self.clarity,
            hallucination_risk: self.hallucination_risk,
            overall_score: self.overall_score,
            source: parse_source(&self.source)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct RawExecutionRow {
    id: String,
    prompt_version_id: String,
    response_text: String,
    response_time_ms: i64,
    created_at: String,
    prompt_name: String,
    version_number: u32,
    evaluation: Option<RawEvaluation>,
}

fn raw_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, u32, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_version(raw: (String, String, u32, String, String)) -> StoreResult<PromptVersion> {
    let (id, prompt_id, version_number, content, created_at) = raw;
    Ok(PromptVersion {
        id,
        prompt_id,
        version_number,
        content,
        created_at: parse_ts(&created_at)?,
    })
}

impl PromptStore for SqliteStore {
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

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO prompts (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![prompt.id, prompt.name, prompt.description, ts(&prompt.created_at)],
        )
        .map_err(backend)?;

        tracing::debug!(prompt_id = %prompt.id, name = %prompt.name, "created prompt");
        Ok(prompt)
    }

    fn list_prompts(&self) -> StoreResult<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, description, created_at FROM prompts ORDER BY created_at, rowid")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(backend)?;

        let mut prompts = Vec::new();
        for row in rows {
            let (id, name, description, created_at) = row.map_err(backend)?;
            prompts.push(Prompt {
                id,
                name,
                description,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(prompts)
    }

    fn create_version(&self, prompt_id: &str, content: &str) -> StoreResult<PromptVersion> {
        if content.trim().is_empty() {
            return Err(StoreError::InvalidInput("version content must not be empty".into()));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(backend)?;

        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM prompts WHERE id = ?1", params![prompt_id], |r| r.get(0))
            .optional()
            .map_err(backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "prompt",
                id: prompt_id.to_string(),
            });
        }

        let existing: u32 = tx
            .query_row(
                "SELECT COUNT(*) FROM prompt_versions WHERE prompt_id = ?1",
                params![prompt_id],
                |r| r.get(0),
            )
            .map_err(backend)?;

        let version = PromptVersion {
            id: Uuid::new_v4().to_string(),
            prompt_id: prompt_id.to_string(),
            version_number: existing + 1,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO prompt_versions (id, prompt_id, version_number, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                version.id,
                version.prompt_id,
                version.version_number,
                version.content,
                ts(&version.created_at)
            ],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;

        tracing::debug!(
            prompt_id = %version.prompt_id,
            version = version.version_number,
            "created prompt version"
        );
        Ok(version)
    }

    fn list_versions(&self, prompt_id: &str) -> StoreResult<Vec<PromptVersion>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, prompt_id, version_number, content, created_at
                 FROM prompt_versions WHERE prompt_id = ?1 ORDER BY version_number",
            )
            .map_err(backend)?;
        let rows = stmt.query_map(params![prompt_id], raw_version).map_err(backend)?;

        let mut versions = Vec::new();
        for row in rows {
            versions.push(into_version(row.map_err(backend)?)?);
        }
        Ok(versions)
    }

    fn get_version(&self, version_id: &str) -> StoreResult<PromptVersion> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT id, prompt_id, version_number, content, created_at
                 FROM prompt_versions WHERE id = ?1",
                params![version_id],
                raw_version,
            )
            .optional()
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "prompt version",
                id: version_id.to_string(),
            })?;
        into_version(raw)
    }

    fn save_execution(&self, execution: &Execution, evaluation: &Evaluation) -> StoreResult<()> {
        if evaluation.execution_id != execution.id {
            return Err(StoreError::InvalidInput(format!(
                "evaluation {} belongs to execution {}, not {}",
                evaluation.id, evaluation.execution_id, execution.id
            )));
        }
        let source = serde_json::to_string(&evaluation.source)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(backend)?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM prompt_versions WHERE id = ?1",
                params![execution.prompt_version_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(backend)?;
        if exists.is_none() {
            return Err(StoreError::NotFound {
                entity: "prompt version",
                id: execution.prompt_version_id.clone(),
            });
        }

        tx.execute(
            "INSERT INTO executions (id, prompt_version_id, response_text, response_time_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution.id,
                execution.prompt_version_id,
                execution.response_text,
                execution.response_time_ms as i64,
                ts(&execution.created_at)
            ],
        )
        .map_err(backend)?;

        tx.execute(
            "INSERT INTO evaluations
             (id, execution_id, accuracy, clarity, hallucination_risk, overall_score, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                evaluation.id,
                evaluation.execution_id,
                evaluation.accuracy,
                evaluation.clarity,
                evaluation.hallucination_risk,
                evaluation.overall_score,
                source,
                ts(&evaluation.created_at)
            ],
        )
        .map_err(backend)?;

        tx.commit().map_err(backend)?;
        Ok(())
    }

    fn list_executions(&self) -> StoreResult<Vec<ExecutionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, e.prompt_version_id, e.response_text, e.response_time_ms, e.created_at,
                        p.name, v.version_number,
                        ev.id, ev.accuracy, ev.clarity, ev.hallucination_risk, ev.overall_score,
                        ev.source, ev.created_at
                 FROM executions e
                 JOIN prompt_versions v ON v.id = e.prompt_version_id
                 JOIN prompts p ON p.id = v.prompt_id
                 LEFT JOIN evaluations ev ON ev.execution_id = e.id
                 ORDER BY e.created_at DESC, e.rowid DESC",
            )
            .map_err(backend)?;

        let rows = stmt
            .query_map([], |row| {
                let execution_id: String = row.get(0)?;
                let evaluation = match row.get::<_, Option<String>>(7)? {
                    Some(ev_id) => Some(RawEvaluation {
                        id: ev_id,
                        execution_id: execution_id.clone(),
                        accuracy: row.get(8)?,
                        clarity: row.get(9)?,
                        hallucination_risk: row.get(10)?,
                        overall_score: row.get(11)?,
                        source: row.get(12)?,
                        created_at: row.get(13)?,
                    }),
                    None => None,
                };
                Ok(RawExecutionRow {
                    id: execution_id,
                    prompt_version_id: row.get(1)?,
                    response_text: row.get(2)?,
                    response_time_ms: row.get(3)?,
                    created_at: row.get(4)?,
                    prompt_name: row.get(5)?,
                    version_number: row.get(6)?,
                    evaluation,
                })
            })
            .map_err(backend)?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(backend)?;
            let evaluation = match raw.evaluation {
                Some(ev) => EvaluationState::Scored(ev.into_evaluation()?),
                None => EvaluationState::Missing,
            };
            records.push(ExecutionRecord {
                execution: Execution {
                    id: raw.id,
                    prompt_version_id: raw.prompt_version_id,
                    response_text: raw.response_text,
                    response_time_ms: raw.response_time_ms.max(0) as u64,
                    created_at: parse_ts(&raw.created_at)?,
                },
                prompt_name: raw.prompt_name,
                version_number: raw.version_number,
                evaluation,
            });
        }
        Ok(records)
    }

    fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, execution_id, accuracy, clarity, hallucination_risk, overall_score,
                        source, created_at
                 FROM evaluations ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawEvaluation {
                    id: row.get(0)?,
                    execution_id: row.get(1)?,
                    accuracy: row.get(2)?,
                    clarity: row.get(3)?,
                    hallucination_risk: row.get(4)?,
                    overall_score: row.get(5)?,
                    source: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(backend)?;

        let mut evaluations = Vec::new();
        for row in rows {
            evaluations.push(row.map_err(backend)?.into_evaluation()?);
        }
        Ok(evaluations)
    }
}
