use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use promptops_core::{service, PipelineConfig, ServiceError};
use promptops_store::SqliteStore;
use promptops_types::{history_table, metrics_table, Prompt, PromptStore, PromptVersion, RunOutcome};
use serde::Serialize;
use tabled::{Table, Tabled};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "promptops", about = "Version prompts, run them, and score the responses")]
struct Cli {
	/// SQLite database file
	#[arg(long, global = true, default_value = "promptops.db")]
	db: PathBuf,

	/// YAML pipeline config (models, retry, weights)
	#[arg(long, global = true)]
	config: Option<PathBuf>,

	/// Log filter when RUST_LOG is unset
	#[arg(long, global = true, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Manage prompts
	#[command(subcommand)]
	Prompt(PromptCommand),
	/// Manage prompt versions
	#[command(subcommand)]
	Version(VersionCommand),
	/// Generate and evaluate one or more versions
	Run(RunArgs),
	/// Show execution history, newest first
	History(OutputArgs),
	/// Show averaged scores
	Metrics(OutputArgs),
}

#[derive(Debug, Subcommand)]
enum PromptCommand {
	Create {
		#[arg(long)]
		name: String,
		#[arg(long, default_value = "")]
		description: String,
	},
	List,
}

#[derive(Debug, Subcommand)]
enum VersionCommand {
	Create {
		/// Prompt id
		#[arg(long)]
		prompt: String,
		#[arg(long, conflicts_with = "file", required_unless_present = "file")]
		content: Option<String>,
		/// Read the content from a file
		#[arg(long)]
		file: Option<PathBuf>,
	},
	List {
		#[arg(long)]
		prompt: String,
	},
}

#[derive(Debug, Args)]
struct RunArgs {
	/// Version id; repeat to run several
	#[arg(long = "version", required = true)]
	versions: Vec<String>,

	/// Runs in flight when several versions are given
	#[arg(long, default_value_t = 4)]
	concurrency: usize,

	/// Write the outcome(s) as JSON
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct OutputArgs {
	/// Write the rows as JSON
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[derive(Tabled)]
struct PromptRow {
	id: String,
	name: String,
	description: String,
	created_at: String,
}

#[derive(Tabled)]
struct VersionRow {
	id: String,
	version: String,
	created_at: String,
	content: String,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	// RUST_LOG wins over --log-level
	let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
	tracing_subscriber::registry()
		.with(fmt::layer().with_writer(std::io::stderr))
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
		.init();

	let store = SqliteStore::open(&cli.db)
		.with_context(|| format!("failed to open database {}", cli.db.display()))?;

	match cli.command {
		Commands::Prompt(cmd) => prompt(&store, cmd)?,
		Commands::Version(cmd) => version(&store, cmd).await?,
		Commands::Run(args) => run(&store, cli.config.as_deref(), args).await?,
		Commands::History(args) => {
			let records = store.list_executions()?;
			println!("{}", history_table(&records));
			write_json(args.json_out.as_deref(), &records).await?;
		}
		Commands::Metrics(args) => {
			let overall = service::metrics(&store)?;
			let by_version = service::version_metrics(&store)?;
			match &overall {
				Some(overall) => println!("{}", metrics_table(overall, &by_version)),
				None => println!("No executions yet."),
			}
			write_json(
				args.json_out.as_deref(),
				&serde_json::json!({ "overall": overall, "versions": by_version }),
			)
			.await?;
		}
	}
	Ok(())
}

fn prompt(store: &dyn PromptStore, cmd: PromptCommand) -> Result<()> {
	match cmd {
		PromptCommand::Create { name, description } => {
			let prompt = store.create_prompt(&name, &description)?;
			println!("Created prompt {} ({})", prompt.name, prompt.id);
		}
		PromptCommand::List => {
			let rows: Vec<PromptRow> = store.list_prompts()?.into_iter().map(prompt_row).collect();
			println!("{}", Table::new(rows));
		}
	}
	Ok(())
}

async fn version(store: &dyn PromptStore, cmd: VersionCommand) -> Result<()> {
	match cmd {
		VersionCommand::Create {
			prompt,
			content,
			file,
		} => {
			let content = match (content, file) {
				(Some(content), _) => content,
				(None, Some(path)) => tokio::fs::read_to_string(&path)
					.await
					.with_context(|| format!("failed to read {}", path.display()))?,
				(None, None) => anyhow::bail!("either --content or --file is required"),
			};
			let version = store.create_version(&prompt, &content)?;
			println!("Created v{} ({})", version.version_number, version.id);
		}
		VersionCommand::List { prompt } => {
			let rows: Vec<VersionRow> = store.list_versions(&prompt)?.into_iter().map(version_row).collect();
			println!("{}", Table::new(rows));
		}
	}
	Ok(())
}

async fn run(store: &dyn PromptStore, config: Option<&Path>, args: RunArgs) -> Result<()> {
	let config = PipelineConfig::load(config).await?;
	let orchestrator = config.build_orchestrator()?;
	tracing::info!(
		generation_model = %config.generation_model,
		evaluation_model = %config.evaluation_model,
		versions = args.versions.len(),
		"starting run"
	);

	let results: Vec<Result<RunOutcome, ServiceError>> = if let [version_id] = args.versions.as_slice() {
		let cancel = async {
			// Without a signal handler, run to completion.
			if tokio::signal::ctrl_c().await.is_err() {
				std::future::pending::<()>().await;
			}
		};
		vec![service::execute_version_until_cancelled(store, &orchestrator, version_id, cancel).await]
	} else {
		service::execute_versions(store, &orchestrator, &args.versions, args.concurrency).await
	};

	let mut outcomes = Vec::new();
	let mut failures = 0usize;
	for (version_id, result) in args.versions.iter().zip(results) {
		match result {
			Ok(outcome) => {
				print_outcome(&outcome);
				outcomes.push(outcome);
			}
			Err(err) => {
				failures += 1;
				tracing::error!(version_id = %version_id, error = %err, "run failed");
			}
		}
	}

	write_json(args.json_out.as_deref(), &outcomes).await?;
	if failures > 0 {
		anyhow::bail!("{} of {} run(s) failed", failures, args.versions.len());
	}
	Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
	let ev = &outcome.evaluation;
	println!("Execution {} ({} ms)", outcome.execution.id, outcome.execution.response_time_ms);
	println!("{}\n", outcome.execution.response_text.trim());
	println!(
		"Accuracy: {:.1}  Clarity: {:.1}  Hallucination risk: {:.1}  Overall: {:.1}",
		ev.accuracy, ev.clarity, ev.hallucination_risk, ev.overall_score
	);
	if ev.is_fallback() {
		println!("Note: the evaluation call failed; fallback scores were recorded.");
	}
}

fn prompt_row(p: Prompt) -> PromptRow {
	PromptRow {
		id: p.id,
		name: p.name,
		description: p.description,
		created_at: p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
	}
}

fn version_row(v: PromptVersion) -> VersionRow {
	let first_line = v.content.lines().next().unwrap_or_default();
	let content = if first_line.chars().count() > 60 || v.content.lines().nth(1).is_some() {
		format!("{}…", first_line.chars().take(59).collect::<String>())
	} else {
		first_line.to_string()
	};
	VersionRow {
		id: v.id,
		version: format!("v{}", v.version_number),
		created_at: v.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
		content,
	}
}

async fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
	if let Some(path) = path {
		let json = serde_json::to_string_pretty(value)?;
		tokio::fs::write(path, json)
			.await
			.with_context(|| format!("failed to write {}", path.display()))?;
	}
	Ok(())
}
