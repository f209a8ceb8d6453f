use promptops_core::{execute_version, service, PipelineConfig};
use promptops_store::SqliteStore;
use promptops_types::{history_table, PromptStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads GEMINI_API_KEY and the PROMPTOPS_* overrides from the environment.
    let config = PipelineConfig::load(None).await?;
    let orchestrator = config.build_orchestrator()?;

    let store = SqliteStore::open_in_memory()?;
    let prompt = store.create_prompt("summarizer", "one-line summaries")?;
    let v1 = store.create_version(&prompt.id, "Summarize in one sentence: Rust is a systems language.")?;
    let v2 = store.create_version(
        &prompt.id,
        "Summarize in one sentence, without adding facts: Rust is a systems language.",
    )?;

    for version in [&v1, &v2] {
        let outcome = execute_version(&store, &orchestrator, &version.id).await?;
        println!(
            "v{} -> overall {:.1}",
            version.version_number, outcome.evaluation.overall_score
        );
    }

    println!("{}", history_table(&store.list_executions()?));
    if let Some(metrics) = service::metrics(&store)? {
        println!("{}", metrics.summary_line());
    }
    Ok(())
}
