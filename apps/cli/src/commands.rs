//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};

use promptbatch_artifacts::ResultStore;
use promptbatch_artifacts::report::{merge_responses, read_listing};
use promptbatch_backend::OllamaBackend;
use promptbatch_core::{
    BackendWorker, DispatchProgress, DispatchSettings, DispatchSummary, Dispatcher, TaskOutcome,
    load_tasks,
};
use promptbatch_enricher::Enricher;
use promptbatch_shared::{
    AppConfig, BackendSpec, RunConfig, Task, init_config, load_config, validate_config,
};

/// Directory picked up automatically by `run` when present.
const DEFAULT_PROMPTS_DIR: &str = "prompts";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// promptbatch: dispatch prompt batches to local inference backends.
#[derive(Parser)]
#[command(
    name = "promptbatch",
    version,
    about = "Dispatch prompt batches across Ollama backends with link enrichment.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./config.toml, then ~/.promptbatch/config.toml).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config_file: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a prompt batch across every configured backend.
    Run {
        /// Prompt files or directories (JSON / JSON Lines).
        #[arg(short, long, num_args = 1..)]
        prompts: Vec<PathBuf>,

        /// Output directory (overrides `[output] dir`).
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Fail a task when any of its references cannot be fetched.
        #[arg(long)]
        strict: bool,

        /// Regenerate even when the stored artifact is up to date.
        #[arg(long)]
        force: bool,
    },

    /// Print prompt and response of every artifact in a directory.
    Print {
        /// Result directory.
        dir: PathBuf,
    },

    /// Merge JSON responses from a result directory into one array.
    Merge {
        /// Result directory to read.
        #[arg(long)]
        input_dir: PathBuf,

        /// File receiving the merged array.
        #[arg(long)]
        output_file: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "promptbatch=info",
        1 => "promptbatch=debug",
        _ => "promptbatch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_file.as_deref();
    match cli.command {
        Command::Run {
            prompts,
            output_dir,
            strict,
            force,
        } => cmd_run(config_path, prompts, output_dir, strict, force).await,
        Command::Print { dir } => cmd_print(&dir),
        Command::Merge {
            input_dir,
            output_file,
        } => cmd_merge(&input_dir, &output_file),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    prompts: Vec<PathBuf>,
    output_dir: Option<PathBuf>,
    strict: bool,
    force: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;

    let mut run_config = RunConfig::from(&config);
    if let Some(dir) = output_dir {
        run_config.output_dir = dir;
    }
    run_config.strict_fetch |= strict;
    run_config.force = force;

    let sources = prompt_sources(prompts);
    if sources.is_empty() {
        return Err(eyre!(
            "no prompt files given and ./{DEFAULT_PROMPTS_DIR}/ does not exist"
        ));
    }
    let tasks = load_tasks(&sources, &run_config.system_message)?;

    let workers = run_config
        .backends
        .iter()
        .map(|spec| {
            let client = OllamaBackend::new(spec.host.clone(), run_config.backend_timeout)?;
            Ok(BackendWorker::new(spec.clone(), Arc::new(client)))
        })
        .collect::<promptbatch_shared::Result<Vec<_>>>()?;

    let dispatcher = Dispatcher::new(
        workers,
        Arc::new(Enricher::from_run_config(&run_config)?),
        Arc::new(ResultStore::new(&run_config.output_dir)),
        DispatchSettings {
            model: run_config.model.clone(),
            force: run_config.force,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(relay_interrupts(tokio::signal::ctrl_c, shutdown_tx, || {
        std::process::exit(130);
    }));

    info!(
        tasks = tasks.len(),
        backends = run_config.backends.len(),
        model = %run_config.model,
        output = %run_config.output_dir.display(),
        "starting batch"
    );

    let progress = Arc::new(CliProgress::new());
    let summary = dispatcher.run(tasks, progress, shutdown_rx).await?;

    print_summary(&summary, &run_config.output_dir);

    if summary.failed > 0 {
        return Err(eyre!("{} task(s) failed", summary.failed));
    }
    Ok(())
}

/// Explicit paths, plus `./prompts/` when it exists. Files reached through
/// more than one of these paths are loaded once by `load_tasks`.
fn prompt_sources(mut explicit: Vec<PathBuf>) -> Vec<PathBuf> {
    let default_dir = PathBuf::from(DEFAULT_PROMPTS_DIR);
    if default_dir.is_dir() {
        explicit.push(default_dir);
    }
    explicit
}

/// The first interrupt asks workers to stop after their in-flight task; the
/// second calls `abort`.
async fn relay_interrupts<S, F>(mut interrupt: S, shutdown: watch::Sender<bool>, abort: impl FnOnce())
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return;
    }
    warn!("interrupt received, finishing in-flight tasks (Ctrl-C again to abort)");
    let _ = shutdown.send(true);

    if interrupt().await.is_ok() {
        warn!("second interrupt received, aborting");
        abort();
    }
}

fn print_summary(summary: &DispatchSummary, output_dir: &Path) {
    println!();
    println!("  Batch finished.");
    println!("  Processed:   {}", summary.processed);
    println!("  Skipped:     {}", summary.skipped);
    println!("  Failed:      {}", summary.failed);
    if summary.not_started > 0 {
        println!("  Not started: {}", summary.not_started);
    }
    println!("  Output:      {}", output_dir.display());
    println!("  Time:        {:.1}s", summary.elapsed.as_secs_f64());
    for (spec, stats) in &summary.per_backend {
        println!(
            "    {spec}: {} processed, {} skipped, {} failed",
            stats.processed, stats.skipped, stats.failed
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl DispatchProgress for CliProgress {
    fn started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar
            .enable_steady_tick(std::time::Duration::from_millis(120));
    }

    fn task_finished(&self, backend: &BackendSpec, task: &Task, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Skipped => {
                self.bar.set_message(format!("{} up to date", task.label()));
            }
            TaskOutcome::Completed(done) => {
                self.bar.set_message(format!(
                    "{} done on {} ({} words, {:.1} wps)",
                    task.label(),
                    backend.host,
                    done.words,
                    done.words_per_second
                ));
            }
            TaskOutcome::Failed(e) => {
                self.bar
                    .println(format!("  failed {} on {}: {e}", task.label(), backend.host));
            }
        }
        self.bar.inc(1);
    }

    fn finished(&self, _summary: &DispatchSummary) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Result tools
// ---------------------------------------------------------------------------

fn cmd_print(dir: &Path) -> Result<()> {
    let listing = read_listing(dir)?;

    for entry in &listing.entries {
        println!("{}", entry.render());
    }
    for (file, reason) in &listing.errors {
        eprintln!("Error reading {file}: {reason}");
    }

    Ok(())
}

fn cmd_merge(input_dir: &Path, output_file: &Path) -> Result<()> {
    let report = merge_responses(input_dir, output_file)?;

    for (file, reason) in &report.skipped {
        eprintln!("Skipped {file}: {reason}");
    }
    println!(
        "Merged {} response(s) into {}",
        report.merged,
        report.output_file.display()
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = init_config(path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config: AppConfig = load_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
