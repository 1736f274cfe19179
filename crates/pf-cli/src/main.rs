//! PatternForge CLI.
//!
//! Evaluate, optimize and version candlestick pattern recognizers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pf_data::{
    AlgorithmCatalog, CandlestickRecognizer, CsvDatasetProvider, DatasetProvider, InMemoryCatalog,
    SyntheticDatasetProvider,
};
use pf_optimizer::{Optimizer, PerformanceEvaluator};
use pf_store::{DiffLine, ParameterChange, StoreConfig, VersionStore};
use pf_tuner::{AutoTuner, TunerConfig, TuningReport};
use pf_types::{AlgorithmVersion, OptimizationMethod};

#[derive(Parser)]
#[command(name = "patternforge")]
#[command(about = "Algorithm optimization and version control for pattern recognizers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Version database (defaults to the user data directory)
    #[arg(long, env = "PATTERNFORGE_DB")]
    db: Option<PathBuf>,

    /// Directory of OHLCV CSV files used as test data (synthetic data when unset)
    #[arg(long, env = "PATTERNFORGE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Concurrent optimization tasks
    #[arg(long, env = "PATTERNFORGE_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// Versions kept per algorithm (the active one is always kept)
    #[arg(long, env = "PATTERNFORGE_MAX_VERSIONS", default_value = "10")]
    max_versions: usize,

    /// Seed for synthetic test data
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every algorithm with its active version.
    Status,

    /// List catalog algorithms and their live parameters.
    List,

    /// Evaluate an algorithm's live parameters.
    Evaluate {
        key: String,
        /// Number of test datasets
        #[arg(short, long, default_value = "5")]
        datasets: usize,
    },

    /// Optimize one algorithm.
    Optimize {
        key: String,
        /// genetic, bayesian, random, gradient
        #[arg(short, long, default_value = "genetic")]
        method: OptimizationMethod,
        #[arg(short, long, default_value = "50")]
        iterations: usize,
        /// Activate the new version when it improves by at least this many percent
        #[arg(long)]
        activate_above: Option<f64>,
    },

    /// Optimize every active algorithm.
    BatchOptimize {
        #[arg(short, long, default_value = "genetic")]
        method: OptimizationMethod,
        #[arg(short, long, default_value = "50")]
        iterations: usize,
        #[arg(long)]
        activate_above: Option<f64>,
    },

    /// Optimize only the algorithms scoring below a threshold, worst first.
    SmartOptimize {
        /// Overall score below which an algorithm is optimized
        #[arg(short, long, default_value = "0.6")]
        threshold: f64,
        /// Relative improvement to aim for (0.1 = 10%)
        #[arg(short = 'g', long, default_value = "0.1")]
        target: f64,
        #[arg(long)]
        activate_above: Option<f64>,
    },

    /// Show the version history of an algorithm, newest first.
    Versions {
        key: String,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Make a version the active one.
    Activate { key: String, version_number: i64 },

    /// Export a version to a JSON file.
    Export {
        key: String,
        version_number: i64,
        path: PathBuf,
    },

    /// Import a version from a JSON file (not activated).
    Import { key: String, path: PathBuf },

    /// Compare two versions by id.
    Compare { version_a: i64, version_b: i64 },

    /// Delete an inactive version by id.
    Delete { version_id: i64 },

    /// Show recorded optimization sessions.
    Sessions {
        key: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

struct Engine {
    store: Arc<VersionStore>,
    evaluator: Arc<PerformanceEvaluator>,
    provider: Arc<dyn DatasetProvider>,
}

impl Engine {
    fn open(cli: &Cli) -> Result<Self> {
        let db_path = match &cli.db {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("patternforge")
                .join("versions.duckdb"),
        };

        let catalog: Arc<dyn AlgorithmCatalog> = Arc::new(InMemoryCatalog::with_defaults());
        let config = StoreConfig::default()
            .with_db_path(db_path.clone())
            .with_max_versions(cli.max_versions);
        let store = VersionStore::open(config, catalog)
            .with_context(|| format!("opening version store at {}", db_path.display()))?;
        let applied = store.sync_catalog()?;
        info!(db = %db_path.display(), applied, "version store ready");

        let provider: Arc<dyn DatasetProvider> = match &cli.data_dir {
            Some(dir) => Arc::new(CsvDatasetProvider::new(dir)),
            None => Arc::new(SyntheticDatasetProvider::new(cli.seed)),
        };
        let evaluator = Arc::new(PerformanceEvaluator::new(Arc::new(CandlestickRecognizer::new())));

        Ok(Self {
            store: Arc::new(store),
            evaluator,
            provider,
        })
    }

    fn tuner(&self, cli: &Cli, activate_above: Option<f64>) -> Arc<AutoTuner> {
        let mut config = TunerConfig::default();
        if let Some(n) = cli.max_workers {
            config = config.with_max_workers(n);
        }
        if let Some(threshold) = activate_above {
            config = config.with_auto_activate(threshold);
        }
        let optimizer = Optimizer::new(self.store.clone(), self.evaluator.clone());
        let tuner = Arc::new(AutoTuner::new(optimizer, self.provider.clone(), config));

        // Ctrl-C lets running strategies finish with their best so far.
        let stopper = tuner.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after current iterations");
                stopper.request_stop();
            }
        });
        tuner
    }
}

fn print_version(version: &AlgorithmVersion) {
    println!(
        "{} v{:<3} id={:<5} {:<8} {} {}{}",
        version.algorithm_key,
        version.version_number,
        version.id,
        version.optimization_method.as_str(),
        version.created_at.format("%Y-%m-%d %H:%M:%S"),
        version.description,
        if version.is_active { "  [active]" } else { "" }
    );
}

fn print_report(report: &TuningReport) {
    println!(
        "Tasks: {} ({} completed, {} failed), success rate {:.1}%",
        report.total_tasks, report.completed, report.failed, report.success_rate
    );
    for outcome in &report.outcomes {
        match (&outcome.error_message, outcome.improvement_percentage) {
            (Some(error), _) => println!("  {:<20} FAILED: {}", outcome.algorithm_key, error),
            (None, Some(improvement)) => println!(
                "  {:<20} {:.4} -> {:.4} ({:+.2}%) version={}{}",
                outcome.algorithm_key,
                outcome.baseline_score.unwrap_or(0.0),
                outcome.best_score.unwrap_or(0.0),
                improvement,
                outcome
                    .best_version_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                if outcome.activated { " [activated]" } else { "" }
            ),
            (None, None) => println!("  {:<20} {:?}", outcome.algorithm_key, outcome.status),
        }
    }
    if let Some(best) = &report.best_algorithm {
        println!(
            "Average improvement {:.2}%, best {} ({:.2}%)",
            report.average_improvement, best, report.best_improvement
        );
    }
    for line in &report.recommendations {
        println!("* {}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let engine = Engine::open(&cli)?;
    let store = engine.store.clone();

    match &cli.command {
        Commands::Status => {
            let catalog = store.catalog();
            for config in catalog.list() {
                let key = config.key();
                let count = store.version_count(key)?;
                match store.get_active_version(key)? {
                    Some(active) => println!(
                        "{:<20} {} versions, active v{} ({})",
                        key, count, active.version_number, active.optimization_method
                    ),
                    None => println!("{:<20} {} versions, built-in parameters", key, count),
                }
            }
            let sessions = store.list_sessions(None, 5)?;
            if !sessions.is_empty() {
                println!("\nRecent sessions:");
                for s in sessions {
                    println!(
                        "  {} {:<20} {:<8} {}",
                        s.start_time.format("%Y-%m-%d %H:%M"),
                        s.algorithm_key,
                        s.method.as_str(),
                        s.status.as_str()
                    );
                }
            }
        }

        Commands::List => {
            for config in store.catalog().list() {
                println!(
                    "{:<20} {:<18} {:<10} {:<8}{}",
                    config.english_name,
                    config.name,
                    config.category,
                    config.signal_type,
                    if config.is_active { "" } else { " (inactive)" }
                );
                println!("    {}", serde_json::to_string(&config.parameters)?);
            }
        }

        Commands::Evaluate { key, datasets } => {
            let config = store
                .catalog()
                .get(key)
                .with_context(|| format!("unknown algorithm {key}"))?;
            let data = engine.provider.create_test_datasets(key, *datasets)?;
            let evaluator = engine.evaluator.clone();
            let metrics = tokio::task::spawn_blocking(move || {
                evaluator.evaluate(config.key(), &config.parameters, &data)
            })
            .await?;
            for (name, value) in metrics.entries() {
                println!("{:<24} {:.4}", name, value);
            }
        }

        Commands::Optimize {
            key,
            method,
            iterations,
            activate_above,
        } => {
            let tuner = engine.tuner(&cli, *activate_above);
            let report = tuner
                .one_click_optimize(Some(vec![key.clone()]), *method, *iterations)
                .await?;
            print_report(&report);
        }

        Commands::BatchOptimize {
            method,
            iterations,
            activate_above,
        } => {
            let tuner = engine.tuner(&cli, *activate_above);
            let report = tuner.one_click_optimize(None, *method, *iterations).await?;
            print_report(&report);
        }

        Commands::SmartOptimize {
            threshold,
            target,
            activate_above,
        } => {
            let tuner = engine.tuner(&cli, *activate_above);
            let report = tuner.smart_optimize(*threshold, *target).await?;
            for (key, score) in &report.current_scores {
                println!("{:<20} {:.4}{}", key, score, if *score < *threshold { "  <" } else { "" });
            }
            print_report(&report);
        }

        Commands::Versions { key, limit } => {
            let versions = store.get_versions(key, *limit)?;
            if versions.is_empty() {
                println!("{} has no stored versions", key);
            }
            for version in &versions {
                print_version(version);
                if let Some(metrics) = store.latest_metrics(version.id)? {
                    println!("    overall score {:.4}", metrics.overall_score);
                }
            }
        }

        Commands::Activate { key, version_number } => {
            let version = store.resolve_version(key, *version_number)?;
            if !store.activate_version(version.id) {
                bail!("could not activate {} v{}", key, version_number);
            }
            println!("{} v{} is now active", key, version_number);
        }

        Commands::Export {
            key,
            version_number,
            path,
        } => {
            let version = store.resolve_version(key, *version_number)?;
            store.export_version(version.id, path)?;
            println!("Exported {} v{} to {}", key, version_number, path.display());
        }

        Commands::Import { key, path } => {
            let id = store.import_version(path, key)?;
            if let Some(version) = store.get_version(id)? {
                print_version(&version);
            }
        }

        Commands::Compare {
            version_a,
            version_b,
        } => {
            let comparison = store.compare_versions(*version_a, *version_b)?;
            println!("Code similarity {:.1}%", comparison.similarity * 100.0);
            if !comparison.identical_code() {
                let changed = comparison
                    .code_diff
                    .iter()
                    .filter(|l| !matches!(l, DiffLine::Unchanged(_)))
                    .count();
                println!("{} changed lines", changed);
                print!("{}", comparison.render_diff());
            }
            for change in &comparison.parameter_changes {
                match change {
                    ParameterChange::Added { name, value } => println!("+ {} = {:?}", name, value),
                    ParameterChange::Removed { name, value } => println!("- {} = {:?}", name, value),
                    ParameterChange::Changed {
                        name,
                        before,
                        after,
                    } => println!("~ {}: {:?} -> {:?}", name, before, after),
                }
            }
            for delta in &comparison.metric_deltas {
                match delta.change_pct {
                    Some(pct) => println!(
                        "{:<24} {:.4} -> {:.4} ({:+.1}%)",
                        delta.metric, delta.before, delta.after, pct
                    ),
                    None => println!("{:<24} {:.4} -> {:.4}", delta.metric, delta.before, delta.after),
                }
            }
        }

        Commands::Delete { version_id } => {
            if !store.delete_version(*version_id) {
                bail!("version {} was not deleted (missing or active)", version_id);
            }
            println!("Deleted version {}", version_id);
        }

        Commands::Sessions { key, limit } => {
            for s in store.list_sessions(key.as_deref(), *limit)? {
                println!(
                    "{} {:<20} {:<8} {:<9} iterations={:<4} best={} improvement={}{}",
                    s.start_time.format("%Y-%m-%d %H:%M:%S"),
                    s.algorithm_key,
                    s.method.as_str(),
                    s.status.as_str(),
                    s.iterations,
                    s.best_score.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".into()),
                    s.improvement_percentage
                        .map(|v| format!("{v:+.2}%"))
                        .unwrap_or_else(|| "-".into()),
                    s.error_message
                        .map(|e| format!(" error: {e}"))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
