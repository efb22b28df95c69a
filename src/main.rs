//! GradePulse - analysis core for AI-graded homework
//!
//! Schedules analysis jobs over task snapshots, aggregates grading errors
//! into a drill-down hierarchy, caches LLM deep analyses keyed by a data
//! hash and flags accuracy anomalies.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, storage, invalid arguments)
//!   2 - At least one analysis job failed, or an anomaly was detected

use anyhow::{Context, Result};
use gradepulse::analysis::Aggregator;
use gradepulse::anomaly::AnomalyDetector;
use gradepulse::cache::CacheLayer;
use gradepulse::cli::{Args, Command, OutputFormat};
use gradepulse::config::{Config, CONFIG_FILE};
use gradepulse::llm::OllamaClient;
use gradepulse::models::{Priority, ReportStatus};
use gradepulse::report;
use gradepulse::scheduler::{AnalysisPipeline, LlmSettings, Scheduler};
use gradepulse::store::{
    FileCacheStore, FileSnapshotStore, MemoryAnomalyLog, MemoryReportStore, ReportStore,
    SnapshotStore, TracingAutomationLog,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Cache directory inside the snapshot directory.
const CACHE_DIR: &str = ".cache";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig { force } = args.command {
        return handle_init_config(force);
    }

    init_logging(&args)?;

    info!("GradePulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_command(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .gradepulse.toml.
fn handle_init_config(force: bool) -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() && !force {
        eprintln!(
            "⚠️  {} already exists. Use --force to overwrite it.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the scheduler, model and anomaly thresholds.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over the verbosity flags.
fn init_logging(args: &Args) -> Result<()> {
    let level = LevelFilter::from_level(args.log_level());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Shared collaborators for every command.
struct Services {
    config: Config,
    snapshots: Arc<FileSnapshotStore>,
    aggregator: Aggregator,
    cache: CacheLayer,
    detector: AnomalyDetector,
}

impl Services {
    fn build(config: Config) -> Result<Self> {
        let snapshots = Arc::new(FileSnapshotStore::new(&config.storage.data_dir)?);
        info!("Reading snapshots from {}", snapshots.dir().display());

        let cache_store = Arc::new(FileCacheStore::new(snapshots.dir().join(CACHE_DIR))?);
        let aggregator = Aggregator::default();
        let cache = CacheLayer::new(snapshots.clone(), cache_store, aggregator.clone());
        let detector = AnomalyDetector::new(
            snapshots.clone(),
            Arc::new(MemoryAnomalyLog::new()),
            config.anomaly_config(),
        )?;

        Ok(Self {
            config,
            snapshots,
            aggregator,
            cache,
            detector,
        })
    }

    fn llm_settings(&self) -> Result<Option<LlmSettings>> {
        let model = &self.config.model;
        if !model.enabled {
            info!("LLM deep analysis disabled");
            return Ok(None);
        }

        let client = OllamaClient::new(model.ollama_url.clone(), model.temperature)?;
        Ok(Some(LlmSettings {
            client: Arc::new(client),
            model: model.name.clone(),
            timeout: Duration::from_secs(model.timeout_seconds),
        }))
    }
}

/// Dispatch the selected subcommand. Returns the exit code.
async fn run_command(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let services = Services::build(config)?;

    match args.command {
        Command::Run {
            tasks,
            priority,
            max_concurrent,
            output,
            format,
        } => {
            let output = output.unwrap_or_else(|| services.config.report.output_dir.clone());
            let format = format.unwrap_or(services.config.report.format);
            handle_run(&services, tasks, priority, max_concurrent, output, format, args.quiet)
                .await
        }
        Command::Stats { task_id, clusters } => handle_stats(&services, &task_id, clusters).await,
        Command::Cached {
            task_id,
            analysis_type,
            target_id,
        } => {
            let target_id = target_id.unwrap_or_else(|| task_id.clone());
            let cached = services
                .cache
                .get_cached(&task_id, &analysis_type, &target_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&cached)?);
            Ok(0)
        }
        Command::Anomaly { task_id, threshold } => {
            if let Some(threshold) = threshold {
                services.detector.set_threshold(threshold)?;
            }
            handle_anomaly(&services, &task_id).await
        }
        // Handled before logging is initialised
        Command::InitConfig { .. } => Ok(0),
    }
}

/// Run the scheduler over a set of tasks and write their reports.
async fn handle_run(
    services: &Services,
    tasks: Vec<String>,
    priority: Priority,
    max_concurrent: Option<usize>,
    output: PathBuf,
    format: OutputFormat,
    quiet: bool,
) -> Result<i32> {
    let tasks = if tasks.is_empty() {
        services.snapshots.list_tasks().await?
    } else {
        tasks
    };
    if tasks.is_empty() {
        println!("No snapshots found in {}", services.snapshots.dir().display());
        return Ok(0);
    }

    let pipeline = AnalysisPipeline::new(
        services.snapshots.clone(),
        services.cache.clone(),
        services.aggregator.clone(),
        services.llm_settings()?,
    );
    let reports = Arc::new(MemoryReportStore::new());
    let scheduler = Scheduler::new(
        services.config.scheduler_config(),
        Arc::new(pipeline),
        reports.clone(),
        Arc::new(TracingAutomationLog),
    )?;
    if let Some(max) = max_concurrent {
        scheduler.set_max_concurrent(max)?;
    }

    println!("🔬 Analyzing {} task(s)...", tasks.len());
    for task_id in &tasks {
        let queued = scheduler.enqueue(task_id, priority)?;
        debug!("{} -> job {} at position {}", task_id, queued.job_id, queued.position);
    }

    let spinner = if quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    };

    let idle = scheduler.wait_idle();
    tokio::pin!(idle);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = ticker.tick() => {
                if let Some(ref pb) = spinner {
                    let status = scheduler.status();
                    let running: Vec<String> = status
                        .running
                        .iter()
                        .map(|job| format!("{} {}% {}", job.task_id, job.progress, job.step))
                        .collect();
                    pb.set_message(format!(
                        "{} waiting | {}",
                        status.waiting,
                        running.join(", ")
                    ));
                }
            }
        }
    }
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let options = services.config.report_options();
    let mut failed = 0usize;
    println!("\n📝 Reports:");
    for task_id in &tasks {
        let Some(report) = reports.get_latest_report(task_id).await? else {
            warn!("No report recorded for {}", task_id);
            continue;
        };

        let path = report::write_report(&report, &output, format, &options)?;
        match report.status {
            ReportStatus::Completed => println!(
                "   ✅ {} - {} errors / {} questions -> {}",
                task_id,
                report.summary.total_errors,
                report.summary.total_questions,
                path.display()
            ),
            _ => {
                failed += 1;
                println!(
                    "   ❌ {} - {} -> {}",
                    task_id,
                    report.error_message.as_deref().unwrap_or("failed"),
                    path.display()
                );
            }
        }
    }

    let mut anomalies = 0usize;
    for task_id in &tasks {
        match services.detector.detect_anomaly(task_id).await {
            Ok(Some(anomaly)) => {
                anomalies += 1;
                println!(
                    "   {} {} anomaly on {}: {}",
                    anomaly.severity.emoji(),
                    anomaly.anomaly_type,
                    task_id,
                    anomaly.message
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Anomaly check for {} failed: {}", task_id, e),
        }
    }

    println!(
        "\n📊 {} completed, {} failed, {} anomalies",
        tasks.len() - failed,
        failed,
        anomalies
    );

    Ok(if failed > 0 || anomalies > 0 { 2 } else { 0 })
}

/// Print quick statistics (and optionally clusters) for one task.
async fn handle_stats(services: &Services, task_id: &str, clusters: bool) -> Result<i32> {
    let snapshot = services
        .snapshots
        .load(task_id)
        .await?
        .with_context(|| format!("Task {} not found", task_id))?;

    let stats = services.aggregator.quick_stats(&snapshot);
    let mut value = serde_json::to_value(&stats)?;
    value["data_hash"] = serde_json::Value::String(stats.data_hash());
    if clusters {
        value["clusters"] = serde_json::to_value(services.aggregator.coarse_clusters(&snapshot))?;
    }

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(0)
}

/// Check one task for an accuracy anomaly.
async fn handle_anomaly(services: &Services, task_id: &str) -> Result<i32> {
    match services.detector.detect_anomaly(task_id).await? {
        Some(anomaly) => {
            println!("{}", serde_json::to_string_pretty(&anomaly)?);
            Ok(2)
        }
        None => {
            println!(
                "✅ No anomaly for {} at {:.1} sigma",
                task_id,
                services.detector.threshold()
            );
            Ok(0)
        }
    }
}
