use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use reflexion_core::capabilities::{
    FileArtifactStore, StaticSearch, generator_tools, researcher_tools,
};
use reflexion_core::prompts::PIPELINE_RESEARCHER_PROMPT;
use reflexion_core::{
    Config, ConfigLoader, DynEngine, EvaluationHarness, GeneratorStage, JsonReflectionGate,
    Orchestrator, ReflectionGate, RunLogInput, ScriptedEngine, SentinelCritic,
    log_run_completion, persist_trace, render_comparison_table,
};
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "reflexion-cli",
    version,
    about = "Reflective research loop driven by replayed engine scripts"
)]
struct Cli {
    /// Configuration file (falls back to REFLEXION_CONFIG, then reflexion.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one research query through the loop.
    Run(RunArgs),
    /// Summarize a runs.jsonl log.
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Query to research.
    #[arg(long)]
    query: String,

    /// Artifact name for the saved answer (defaults to output.default_name).
    #[arg(long)]
    output: Option<String>,

    /// JSON array of engine replies for the researcher (and generator).
    #[arg(long)]
    script: PathBuf,

    /// JSON array of replies for the reflection gate; defaults to --script.
    #[arg(long)]
    reflection_script: Option<PathBuf>,

    /// `{"web": [...], "papers": [...]}` search fixtures.
    #[arg(long)]
    search_fixture: Option<PathBuf>,

    /// Use the critic + generator pipeline instead of the JSON reflection gate.
    #[arg(long, default_value_t = false)]
    pipeline: bool,

    /// Directory to persist the state trace into (overrides trace.dir).
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Print a summary of the state transitions after the answer.
    #[arg(long, value_enum)]
    print_trace: Option<TraceFormat>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TraceFormat {
    Markdown,
    Mermaid,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    /// Path to a runs.jsonl file.
    #[arg(long)]
    log: PathBuf,

    /// Also print the per-run comparison table.
    #[arg(long, default_value_t = false)]
    table: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.clone())?;

    let level = config.logging.level.clone();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},reflexion_core={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Run(args) => run_command(args, config).await?,
            Command::Summarize(args) => summarize_command(args)?,
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn run_command(args: RunArgs, config: Config) -> Result<()> {
    let run_id = Uuid::new_v4().to_string();
    let output_name = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.default_name.clone());
    info!(%run_id, query = %args.query, output = %output_name, "starting run");

    let engine: DynEngine = Arc::new(ScriptedEngine::from_json_file(&args.script)?);
    let gate_engine: DynEngine = match &args.reflection_script {
        Some(path) => Arc::new(ScriptedEngine::from_json_file(path)?),
        None => engine.clone(),
    };
    let search = Arc::new(match &args.search_fixture {
        Some(path) => StaticSearch::from_json_file(path)?,
        None => StaticSearch::new(),
    });
    let store = Arc::new(FileArtifactStore::new(config.output.dir.clone()));

    let gate: Arc<dyn ReflectionGate> = if args.pipeline {
        Arc::new(SentinelCritic::new(gate_engine))
    } else {
        Arc::new(JsonReflectionGate::new(gate_engine))
    };

    let mut orchestrator = Orchestrator::new(config.guardrails, engine.clone(), gate)?
        .with_researcher_tools(researcher_tools(&args.query, search.clone(), search))
        .with_checkpoint(store.clone(), output_name.clone());
    if args.pipeline {
        orchestrator = orchestrator
            .with_researcher_prompt(PIPELINE_RESEARCHER_PROMPT)
            .with_generator(GeneratorStage::new(engine, generator_tools(store)));
    }

    let result = orchestrator.run(&args.query).await?;

    if let Some(dir) = args.trace_dir.or(config.trace.dir) {
        match persist_trace(&dir, &run_id, result.trace.events()) {
            Ok(path) => info!(path = %path.display(), "trace persisted"),
            Err(err) => warn!(error = %err, "failed to persist trace"),
        }
    }

    let log_input = RunLogInput::from_result(
        run_id.clone(),
        args.query.clone(),
        Some(output_name.clone()),
        &result,
    );
    if let Err(err) = log_run_completion(&config.logging.dir, log_input) {
        warn!(error = %err, "failed to append run log");
    }

    println!("{}", result.final_text);
    println!();
    println!("Saved: {} | {}", output_name, result.diagnostics());

    if let Some(format) = args.print_trace {
        let summary = result.trace.summary();
        println!();
        match format {
            TraceFormat::Markdown => print!("{}", summary.render_markdown()),
            TraceFormat::Mermaid => print!("{}", summary.render_mermaid()),
        }
    }
    Ok(())
}

fn summarize_command(args: SummarizeArgs) -> Result<()> {
    let metrics = EvaluationHarness::analyze_log(&args.log)
        .with_context(|| format!("failed to summarize {}", args.log.display()))?;
    println!("{}", metrics.summary());
    for run_id in &metrics.aborted {
        println!("aborted: {run_id}");
    }

    if args.table {
        let rows = EvaluationHarness::comparison_rows(&args.log)?;
        println!();
        print!("{}", render_comparison_table(&rows));
    }
    Ok(())
}
