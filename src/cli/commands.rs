//! CLI command definitions for bench_forge.
//!
//! Two commands: `run` drives the benchmark pipeline (inference and/or
//! evaluation, resumable by run id), `aggregate` recomputes metrics from the
//! ledgers of a finished or interrupted run.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{
    HarnessConfig, DEFAULT_EVAL_WORKERS, DEFAULT_MAX_TURNS, DEFAULT_TIMEOUT_SECS,
};
use crate::executor::{AttemptRunner, SandboxRunner};
use crate::ledger::Ledger;
use crate::metrics;
use crate::orchestrator::Orchestrator;
use crate::resume::{self, ResumeFlags};
use crate::select;
use crate::suite::Suite;

/// Default output directory for run artifacts.
const DEFAULT_OUTPUT_DIR: &str = "./runs";

/// Default Docker image for inference sandboxes.
const DEFAULT_AGENT_IMAGE: &str = "bench-forge-agent:latest";

/// Default Docker image for evaluation sandboxes.
const DEFAULT_EVAL_IMAGE: &str = "bench-forge-eval:latest";

/// Resumable benchmark harness: agentic inference plus sandboxed evaluation.
#[derive(Parser)]
#[command(name = "bench_forge")]
#[command(about = "Run agentic coding benchmarks in Docker sandboxes")]
#[command(version)]
#[command(
    long_about = "bench_forge runs a benchmark suite end to end: an agent CLI produces a candidate\nprogram per task inside an isolated sandbox, then opaque evaluation fixtures score\neach candidate. Every concluded attempt is appended to a crash-safe ledger, so an\ninterrupted run resumes where it left off.\n\nExample usage:\n  bench_forge run --benchmark-path ./benchmark --run-id baseline --tasks 1-20"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the benchmark pipeline (resumes by run id).
    Run(RunArgs),

    /// Recompute and print metrics from an existing run's ledgers.
    #[command(alias = "agg")]
    Aggregate(AggregateArgs),
}

/// Arguments for `bench_forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Benchmark fixture root (datasets/, gold_programs/, eval_programs/, tasks.jsonl).
    #[arg(short, long)]
    pub benchmark_path: PathBuf,

    /// Output directory for ledgers, per-task logs and candidate programs.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Run id grouping this run's attempts. Reusing an id resumes it.
    #[arg(short, long)]
    pub run_id: String,

    /// Task selection: "all", single ids, ranges, or a mix ("1-20,25,31-40").
    #[arg(short, long)]
    pub tasks: Option<String>,

    /// Agent turn budget per inference attempt.
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: u32,

    /// Hard wall-clock deadline per sandboxed attempt, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Evaluation worker pool size.
    #[arg(short = 'w', long, default_value_t = DEFAULT_EVAL_WORKERS)]
    pub eval_workers: usize,

    /// Skip the inference phase (evaluate existing candidate programs).
    #[arg(long)]
    pub skip_inference: bool,

    /// Skip the evaluation phase (produce candidate programs only).
    #[arg(long, conflicts_with = "skip_inference")]
    pub skip_evaluation: bool,

    /// Re-run both phases even for tasks already concluded under this run id.
    #[arg(long)]
    pub force_reeval: bool,

    /// Docker image for inference sandboxes.
    #[arg(long, default_value = DEFAULT_AGENT_IMAGE)]
    pub agent_image: String,

    /// Docker image for evaluation sandboxes.
    #[arg(long, default_value = DEFAULT_EVAL_IMAGE)]
    pub eval_image: String,

    /// Docker network mode for sandboxes (none, bridge, host).
    #[arg(long, default_value = "bridge")]
    pub network: String,

    /// Agent CLI binary invoked inside the inference sandbox.
    #[arg(long, default_value = "claude")]
    pub agent_cmd: String,
}

/// Arguments for `bench_forge aggregate`.
#[derive(Parser, Debug)]
pub struct AggregateArgs {
    /// Output directory the run was written to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Run id to aggregate.
    #[arg(short, long)]
    pub run_id: String,

    /// Print the metrics as JSON instead of a text report.
    #[arg(short, long)]
    pub json: bool,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_benchmark(args).await,
        Commands::Aggregate(args) => aggregate_run(args),
    }
}

async fn run_benchmark(args: RunArgs) -> anyhow::Result<()> {
    let config = Arc::new(HarnessConfig {
        benchmark_path: args.benchmark_path,
        output_dir: args.output_dir,
        run_id: args.run_id.clone(),
        max_turns: args.max_turns,
        timeout: Duration::from_secs(args.timeout_secs),
        eval_workers: args.eval_workers.max(1),
        skip_inference: args.skip_inference,
        skip_evaluation: args.skip_evaluation,
        force_reeval: args.force_reeval,
        agent_image: args.agent_image,
        eval_image: args.eval_image,
        network: args.network,
        agent_cmd: args.agent_cmd,
    });

    config.validate_fixtures()?;
    config.ensure_docker_available().await?;

    let suite = Suite::load(&config.tasks_path())?;
    let resolved = select::resolve(args.tasks.as_deref(), suite.len())?;
    info!(
        run_id = %config.run_id,
        suite = suite.len(),
        selected = resolved.len(),
        "Loaded benchmark suite"
    );

    let inference_ledger = Arc::new(Ledger::open(config.inference_ledger_path())?);
    let evaluation_ledger = Arc::new(Ledger::open(config.evaluation_ledger_path())?);

    let flags = ResumeFlags {
        skip_inference: args.skip_inference,
        skip_evaluation: args.skip_evaluation,
        force_reeval: args.force_reeval,
    };
    let plan = resume::plan(
        &resolved,
        &config.run_id,
        &inference_ledger,
        &evaluation_ledger,
        flags,
    );
    if plan.is_empty() {
        info!(run_id = %config.run_id, "Nothing to do; run already complete");
        print_metrics(&config, &inference_ledger, &evaluation_ledger, false)?;
        return Ok(());
    }

    let (shutdown, _) = broadcast::channel(4);
    let signal_tx = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight work and shutting down");
            let _ = signal_tx.send(());
        }
    });

    let runner: Arc<dyn AttemptRunner> = Arc::new(SandboxRunner::new(Arc::clone(&config)));
    let orchestrator = Orchestrator::new(
        Arc::clone(&config),
        runner,
        Arc::clone(&inference_ledger),
        Arc::clone(&evaluation_ledger),
    );

    let summary = orchestrator.run(&suite, &plan, shutdown).await?;
    info!(
        run_id = %config.run_id,
        inferred = summary.inference_dispatched,
        interrupted = summary.interrupted,
        "Run finished"
    );

    print_metrics(&config, &inference_ledger, &evaluation_ledger, false)?;

    if summary.interrupted {
        anyhow::bail!("run interrupted; rerun with --run-id {} to resume", config.run_id);
    }
    Ok(())
}

fn aggregate_run(args: AggregateArgs) -> anyhow::Result<()> {
    let config = HarnessConfig {
        benchmark_path: PathBuf::new(),
        output_dir: args.output_dir,
        run_id: args.run_id,
        max_turns: DEFAULT_MAX_TURNS,
        timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        eval_workers: DEFAULT_EVAL_WORKERS,
        skip_inference: false,
        skip_evaluation: false,
        force_reeval: false,
        agent_image: String::new(),
        eval_image: String::new(),
        network: String::new(),
        agent_cmd: String::new(),
    };

    if !config.inference_ledger_path().is_file() && !config.evaluation_ledger_path().is_file() {
        anyhow::bail!(
            "no ledgers found under {}; is the run id correct?",
            config.run_dir().display()
        );
    }

    let inference_ledger = Ledger::open(config.inference_ledger_path())?;
    let evaluation_ledger = Ledger::open(config.evaluation_ledger_path())?;
    print_metrics(&config, &inference_ledger, &evaluation_ledger, args.json)
}

/// Aggregates both ledgers, prints the report, and persists `metrics.json`
/// into the run directory.
fn print_metrics(
    config: &HarnessConfig,
    inference_ledger: &Ledger,
    evaluation_ledger: &Ledger,
    json: bool,
) -> anyhow::Result<()> {
    let run_id = &config.run_id;
    let inference = inference_ledger.entries_for(run_id, crate::attempt::Phase::Inference);
    let evaluation = evaluation_ledger.entries_for(run_id, crate::attempt::Phase::Evaluation);
    let metrics = metrics::aggregate(run_id, &inference, &evaluation);

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print!("{}", metrics.render());
    }

    let metrics_path = config.run_dir().join("metrics.json");
    if let Some(parent) = metrics_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&metrics_path, serde_json::to_string_pretty(&metrics)?)?;
    Ok(())
}
