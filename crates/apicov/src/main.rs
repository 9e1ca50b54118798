//! apicov - Measure OpenAPI endpoint coverage of HTTP test suites
//!
//! Test workers record the requests they make into a shared hits directory;
//! apicov aggregates those files against an OpenAPI document and reports which
//! declared endpoints were exercised, which were not, and which 5xx responses
//! were seen along the way.

use apicov::config::{Config, DEFAULT_CONFIG_PATH};
use apicov::output::{render_report, OutputFormat};
use apicov::{
    find_project_root, init_logging, literal_patterns, load_config, load_config_or_default,
    load_spec,
};
use apicov_core::{
    clean, collect_snapshots, extract_path, replay, write_report, Aggregator, PathNormalizer,
    Recorder, RecorderOptions, ReportBuilder, WorkerStore,
};
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing::warn;

/// CLI arguments
#[derive(Debug, Parser)]
#[command(name = "apicov", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file (default: .config/apicov/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// OpenAPI/Swagger document to measure against
    #[arg(long, global = true)]
    spec: Option<PathBuf>,

    /// Directory holding the per-worker hit files
    #[arg(long, global = true)]
    hits_dir: Option<PathBuf>,
}

/// Subcommands
#[derive(Debug, Subcommand)]
enum Command {
    /// Aggregate all worker files and print a coverage report
    Report {
        /// Where to write the JSON report (default: coverage/api-coverage.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: text, json, markdown
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Exit 1 if coverage is below the threshold
        #[arg(long)]
        check: bool,

        /// Minimum coverage percentage to pass (default: 0)
        #[arg(long)]
        threshold: Option<f64>,

        /// Also list tested endpoints and error messages
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show how observed paths resolve to declared endpoints
    Normalize {
        /// HTTP method
        method: String,

        /// Observed paths or URLs
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List the endpoints the spec declares
    Endpoints,

    /// Replay a JSONL file of observations as one worker
    Ingest {
        /// Newline-delimited JSON observations
        file: PathBuf,

        /// Worker id (default: config, then APICOV_WORKER_ID, then random)
        #[arg(long)]
        worker: Option<String>,
    },

    /// Delete all worker files from the hits directory
    Clean,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let root = find_project_root()?;
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_config_or_default(&root.join(DEFAULT_CONFIG_PATH)),
    };
    // Paths given on the command line are relative to the working directory
    let cwd = std::env::current_dir().wrap_err("Failed to get current directory")?;
    if let Some(spec) = cli.spec {
        config.spec = Some(cwd.join(spec));
    }
    if let Some(hits_dir) = cli.hits_dir {
        config.hits_dir = Some(cwd.join(hits_dir));
    }

    match cli.command {
        Command::Report {
            output,
            format,
            check,
            threshold,
            verbose,
        } => run_report_command(
            &config,
            &root,
            ReportArgs {
                output: output.map(|p| cwd.join(p)),
                format,
                check,
                threshold,
                verbose,
            },
        ),
        Command::Normalize { method, paths } => run_normalize_command(&config, &root, &method, &paths),
        Command::Endpoints => run_endpoints_command(&config, &root),
        Command::Ingest { file, worker } => run_ingest_command(&config, &root, &file, worker),
        Command::Clean => run_clean_command(&config, &root),
    }
}

struct ReportArgs {
    output: Option<PathBuf>,
    format: String,
    check: bool,
    threshold: Option<f64>,
    verbose: bool,
}

fn run_report_command(config: &Config, root: &Path, args: ReportArgs) -> Result<()> {
    let Some(format) = OutputFormat::parse(&args.format) else {
        eyre::bail!(
            "Unknown output format '{}'. Expected one of: text, json, markdown",
            args.format
        );
    };

    let spec = load_spec(config, root);
    let hits_dir = config.hits_dir(root);
    eprintln!(
        "{} Aggregating worker files in {}...",
        "->".blue().bold(),
        hits_dir.display()
    );

    let snapshots = collect_snapshots(&hits_dir, None);
    eprintln!(
        "   Found {} workers, {} declared endpoints",
        snapshots.len().to_string().green(),
        spec.len().to_string().green()
    );

    let aggregate = Aggregator::new(&spec)
        .with_literal_patterns(&literal_patterns(config, root))
        .aggregate(&snapshots);
    let report = ReportBuilder::new(&spec).build(&aggregate);

    let output = args.output.unwrap_or_else(|| config.output_path(root));
    if let Err(e) = write_report(&report, &output) {
        warn!("Failed to write coverage report: {}", e);
    } else {
        eprintln!("   Wrote {}", output.display());
    }

    print!("{}", render_report(&report, format, args.verbose)?);

    let threshold = args.threshold.unwrap_or_else(|| config.threshold());
    if args.check && !report.is_passing(threshold) {
        eprintln!(
            "{} Coverage {:.2}% is below threshold {:.2}%",
            "!".red().bold(),
            report.coverage_percent(),
            threshold
        );
        std::process::exit(1);
    }

    Ok(())
}

fn run_normalize_command(config: &Config, root: &Path, method: &str, paths: &[String]) -> Result<()> {
    let spec = load_spec(config, root);
    let normalizer = PathNormalizer::new(&spec, &config.custom_patterns);
    let method = method.to_ascii_uppercase();

    for raw in paths {
        let path = spec.strip_base_path(&extract_path(raw, None));
        let resolution = normalizer.resolve(&method, &path);
        println!("{} {} -> {} {}", method, raw, method, resolution.path);
        tracing::debug!("{} resolved by {:?}", raw, resolution.strategy);
    }
    Ok(())
}

fn run_endpoints_command(config: &Config, root: &Path) -> Result<()> {
    let spec = load_spec(config, root);
    if let Some(source) = spec.source() {
        eprintln!(
            "{} {} endpoints in {}",
            "->".blue().bold(),
            spec.len().to_string().green(),
            source.display()
        );
    }
    for key in spec.keys() {
        println!("{}", key);
    }
    Ok(())
}

fn run_ingest_command(config: &Config, root: &Path, file: &Path, worker: Option<String>) -> Result<()> {
    let spec = load_spec(config, root);
    let worker = worker.unwrap_or_else(|| config.worker_id());
    let store = WorkerStore::new(config.hits_dir(root), &worker);
    eprintln!(
        "{} Replaying {} as worker {}...",
        "->".blue().bold(),
        file.display(),
        store.worker_id()
    );

    let options = RecorderOptions {
        custom_patterns: config.custom_patterns.clone(),
        learn_patterns: config.learn_patterns(),
        literal_patterns: literal_patterns(config, root),
    };
    let mut recorder = Recorder::new(spec, options).with_store(store);
    let stats = replay(&mut recorder, file)
        .wrap_err_with(|| format!("Failed to replay {}", file.display()))?;

    eprintln!(
        "   Recorded {} observations ({} skipped), {} distinct endpoints",
        stats.observations.to_string().green(),
        stats.skipped,
        recorder.tracker().keys().len().to_string().green()
    );
    Ok(())
}

fn run_clean_command(config: &Config, root: &Path) -> Result<()> {
    let hits_dir = config.hits_dir(root);
    let removed = clean(&hits_dir)
        .wrap_err_with(|| format!("Failed to clean {}", hits_dir.display()))?;
    eprintln!(
        "{} Removed {} worker files from {}",
        "->".blue().bold(),
        removed.to_string().green(),
        hits_dir.display()
    );
    Ok(())
}
