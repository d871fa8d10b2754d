//! `evolve`: command-line front end for the evolution engine.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json|compact`: structured JSON or single-line output
//! - `RUST_LOG=info`: log level filter
//! - `EVOLUTION_TARGET_REPO`, `EVOLUTION_SCHEDULER_ENABLED`,
//!   `EVOLUTION_INTERVAL_SECS`: override the loaded configuration

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use evolution_engine::config::{self, loader, EngineConfig, OVERRIDE_KEYS};
use evolution_engine::evolve::{
    report, CodeAnalyzer, CycleOutcome, EvolutionEngine, PersistenceLog, SchedulerHandle,
};
use evolution_engine::{init_tracing, metrics, EngineError};
use tracing::{info, warn};

/// Scan a tree, pick the next improvement, and run it through the lifecycle.
#[derive(Parser)]
#[command(name = "evolve")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "EVOLUTION_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List findings without running a cycle.
    Scan {
        /// Tree to scan; defaults to `analyzer.root`.
        root: Option<PathBuf>,
    },
    /// Run exactly one cycle and print its report as Markdown.
    Cycle {
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run cycles on the configured interval until Ctrl-C. Runs a single cycle
    /// when the scheduler is disabled.
    Run {
        /// Seconds between cycles; overrides `scheduler.interval_secs`.
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show the most recent log records.
    History {
        /// Number of records.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the configuration JSON Schema.
    Schema,
    /// Print Prometheus metrics after one cycle.
    Metrics,
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, EngineError> {
    let mut cfg = match path {
        Some(p) => loader::load_from_file(p)?,
        None => EngineConfig::default(),
    };
    let vars: HashMap<String, String> = OVERRIDE_KEYS
        .iter()
        .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v)))
        .collect();
    cfg.apply_overrides(&vars)?;
    Ok(cfg)
}

fn print_outcome(outcome: &CycleOutcome, json: bool) -> Result<(), EngineError> {
    match outcome.report() {
        Some(r) if json => {
            let text = report::to_json(r)
                .map_err(|e| EngineError::Other(e.to_string()))?;
            println!("{text}");
        }
        Some(r) => {
            println!("{}", report::render_markdown(r));
        }
        None => println!("{}", outcome.label()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if let Err(e) = init_tracing() {
        eprintln!("evolve: logging disabled: {e}");
    }
    metrics::init_metrics()?;

    let cfg = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Schema => {
            println!("{}", config::json_schema()?);
        }
        Command::Scan { root } => {
            let analyzer = CodeAnalyzer::new(cfg.analyzer.to_analyzer_config())?;
            let root = root.unwrap_or_else(|| cfg.analyzer.root.clone());
            let (findings, stats) =
                tokio::task::spawn_blocking(move || analyzer.scan_all(root)).await?;
            for f in &findings {
                println!(
                    "{:?} {}:{} {} [{}]",
                    f.severity,
                    f.file_path,
                    f.line,
                    f.description,
                    f.kind
                );
            }
            println!(
                "{} findings in {} files ({} skipped)",
                stats.findings, stats.files_scanned, stats.files_skipped
            );
        }
        Command::Cycle { json } => {
            let engine = EvolutionEngine::from_config(&cfg)?;
            let outcome = engine.run_cycle().await?;
            print_outcome(&outcome, json)?;
        }
        Command::Metrics => {
            let engine = EvolutionEngine::from_config(&cfg)?;
            engine.run_cycle().await?;
            print!("{}", metrics::gather_metrics());
        }
        Command::History { limit } => {
            let engine = EvolutionEngine::from_config(&cfg)?;
            if cfg.engine.state_dir.is_none() {
                warn!("no engine.state_dir configured; history is empty");
            }
            for rec in engine.log().list_recent(limit)? {
                println!(
                    "{} {} {} score={:.2} {}",
                    rec.timestamp.to_rfc3339(),
                    rec.status.label(),
                    rec.improvement_id,
                    rec.score,
                    rec.description
                );
            }
        }
        Command::Run { interval_secs } => {
            let mut scheduler = cfg.scheduler.clone();
            if let Some(secs) = interval_secs {
                if secs == 0 {
                    return Err(
                        EngineError::Other("interval must be at least 1 second".into()).into(),
                    );
                }
                scheduler.interval_secs = secs;
            }
            let engine = Arc::new(EvolutionEngine::from_config(&cfg)?);
            let Some(handle) = engine.clone().spawn_configured(&scheduler) else {
                info!("set scheduler.enabled or EVOLUTION_SCHEDULER_ENABLED to run on a timer; running one cycle");
                let outcome = engine.run_cycle().await?;
                print_outcome(&outcome, false)?;
                return Ok(());
            };

            let interrupted = tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!(err = %e, "failed to listen for Ctrl-C");
                    }
                    true
                }
                _ = wait_finished(&handle) => false,
            };
            if interrupted {
                info!("shutdown requested");
                handle.shutdown().await;
            } else {
                handle.join().await;
            }

            let st = engine.status();
            info!(
                cycles = st.cycles_run,
                completed = st.completed,
                failed = st.failed,
                spam_rejected = st.spam_rejected,
                "scheduler stopped"
            );
        }
    }
    Ok(())
}

async fn wait_finished(handle: &SchedulerHandle) {
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(250));
    while !handle.is_finished() {
        tick.tick().await;
    }
}
