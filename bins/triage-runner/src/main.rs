use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{error, info, warn};
use triage_common::report;
use triage_common::store::StoredRun;
use triage_runner::classifier::Markers;
use triage_runner::config::{self, Overrides};
use triage_runner::discovery::{self, DiscoveryRules};
use triage_runner::runner::ProcessRunner;
use triage_runner::scheduler::{Scheduler, SchedulerOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Parser)]
#[command(name = "triage-runner")]
#[command(
    about = "Run every test case in its own interpreter process and report grouped outcomes",
    long_about = None
)]
struct Cli {
    /// Test identifiers to run; discovered from the test directory when omitted
    identifiers: Vec<String>,

    /// Harness config file [default: config/triage.json, or $TRIAGE_CONFIG]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of concurrent runs, 0 for one per CPU
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Per-run timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory scanned for test cases
    #[arg(long)]
    test_dir: Option<String>,

    /// Record known slow tests as timeouts without running them
    #[arg(long, default_value = "false")]
    bypass_known_timeouts: bool,

    /// Stop the batch at the first command that cannot be launched
    #[arg(long, default_value = "false")]
    fail_fast: bool,

    /// Write the full results as JSON to this path
    #[arg(long)]
    results: Option<PathBuf>,

    /// Report printed to stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
    format: ReportFormat,

    /// Only print the identifiers that would run
    #[arg(long, default_value = "false")]
    list: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout is reserved for the report
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("triage runner starting");

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var(config::ENV_CONFIG).ok().map(PathBuf::from));

    let overrides = Overrides {
        jobs: cli.jobs,
        timeout_secs: cli.timeout,
        test_dir: cli.test_dir.clone(),
        bypass_known_timeouts: cli.bypass_known_timeouts,
        fail_fast: cli.fail_fast,
    };

    let settings = config::load_settings(config_path.as_deref(), &overrides).map_err(|e| {
        error!("Failed to load harness configuration: {:#}", e);
        e
    })?;

    let identifiers = if cli.identifiers.is_empty() {
        let rules = DiscoveryRules::new(&settings.test_prefix, &settings.test_extension);
        discovery::discover(Path::new(&settings.test_dir), &rules)?
    } else {
        discovery::from_explicit(cli.identifiers.clone())
    };

    if cli.list {
        for identifier in &identifiers {
            println!("{}", identifier);
        }
        return Ok(());
    }

    if identifiers.is_empty() {
        warn!(test_dir = %settings.test_dir, "No test cases found");
    }

    let pool_size = config::resolve_pool_size(settings.jobs);
    info!(
        command = ?settings.command,
        timeout_secs = settings.timeout_secs,
        pool_size,
        test_cases = identifiers.len(),
        bypass_known_timeouts = settings.bypass_known_timeouts,
        launch_failure = ?settings.launch_failure,
        "Harness configured"
    );

    let scheduler = Scheduler::new(
        ProcessRunner::new(settings.command.clone(), config::timeout(&settings)),
        settings.tables(),
        Markers::from_config(&settings),
        SchedulerOptions {
            bypass_known_timeouts: settings.bypass_known_timeouts,
            launch_failure: settings.launch_failure,
            progress: true,
        },
    );

    let started_at = Utc::now();

    // On Ctrl-C the workers are detached tasks that keep running until the
    // runtime shuts down as main returns. Dropping an in-flight run then kills
    // its child and the child's process group.
    let batch = tokio::select! {
        result = scheduler.run_all(identifiers, pool_size) => result?,
        _ = signal::ctrl_c() => {
            warn!("Received interrupt, abandoning batch");
            bail!("Interrupted before the batch completed");
        }
    };

    let finished_at = Utc::now();

    let stored = StoredRun::from_batch(
        &batch,
        &settings.command,
        settings.timeout_secs,
        pool_size,
        started_at,
        finished_at,
    );

    if let Some(path) = &cli.results {
        stored.save(path)?;
        info!(path = %path.display(), run_id = %stored.run_id, "Results written");
    }

    let index = batch.index();
    match cli.format {
        ReportFormat::Markdown => {
            print!("{}", report::render_markdown(&index, &batch.launch_errors))
        }
        ReportFormat::Json => println!("{}", stored.to_json()?),
    }

    info!(
        run_id = %stored.run_id,
        elapsed_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        clean = index.is_clean() && batch.launch_errors.is_empty(),
        summary = %report::summary_line(&index),
        "Run complete"
    );

    Ok(())
}
