//! # evolution-engine
//!
//! Autonomous improvement lifecycle over a source tree.
//!
//! ## Architecture
//!
//! Each cycle scans the tree, picks the highest-priority improvement that was
//! never completed, and walks it through a five-phase lifecycle:
//! ```text
//! scan → select → Scope → Implement → Analyze → Integrate → Assess → publish
//! ```
//! A content guard refuses junk file names, trivial content and exact repeats;
//! completed ids and admitted content hashes are recorded only after a
//! successful publish, so an interrupted cycle can always be retried.
//!
//! ## Entry points
//!
//! - [`evolve::EvolutionEngine`] runs cycles, once or on a timer
//! - [`config::EngineConfig`] describes an engine declaratively
//! - [`metrics`] exposes Prometheus counters for cycles and findings

// ── Lints ─────────────────────────────────────────────────────────────────
// Library code propagates errors; every public item is documented.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]
// Tests assert with unwrap/expect/panic freely.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod evolve;
pub mod metrics;

pub use config::EngineConfig;
pub use evolve::{CycleOutcome, EngineBuilder, EngineStatus, EvolutionEngine};

/// Filter used when `RUST_LOG` is unset or unparsable: engine events at
/// `info`, everything else at `warn`.
pub const DEFAULT_LOG_FILTER: &str = "evolution_engine=info,evolve=info,warn";

/// Log line layout selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with the current span and span list.
    Json,
    /// Single-line human output, for cron and CI logs.
    Compact,
    /// Multi-line human output.
    Pretty,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; unknown or missing values mean
    /// [`LogFormat::Pretty`].
    pub fn from_env_value(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => Self::Json,
            Some("compact") => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Build the event filter from a `RUST_LOG` value, falling back to
/// [`DEFAULT_LOG_FILTER`].
pub fn log_filter(raw: Option<&str>) -> EnvFilter {
    raw.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber for cycle logs.
///
/// `LOG_FORMAT` picks the layout (`json`, `compact`, otherwise pretty) and
/// `RUST_LOG` the filter; cycle, publish and scheduler events are emitted at
/// `info` under the default filter.
///
/// # Errors
///
/// Returns [`EngineError::Other`] if a global subscriber is already set.
///
/// # Example
///
/// ```no_run
/// # use evolution_engine::{init_tracing, EngineError};
/// # fn example() -> Result<(), EngineError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), EngineError> {
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .compact()
            .with_target(false)
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };

    result.map_err(|e| EngineError::Other(format!("tracing init failed: {e}")))
}

/// Top-level engine errors.
///
/// Phase and publish failures are not errors at this level: they end up in a
/// FAILED [`evolve::CycleReport`]. Only infrastructure failures surface here.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] config::validation::ConfigError),

    /// A completed-id or content-hash store failed.
    #[error(transparent)]
    Store(#[from] evolve::store::StoreError),

    /// An analyzer rule failed to compile.
    #[error(transparent)]
    Analyzer(#[from] evolve::analyzer::AnalyzerError),

    /// A banned pattern failed to compile.
    #[error(transparent)]
    Guard(#[from] evolve::guard::GuardError),

    /// The cycle log failed.
    #[error(transparent)]
    Log(#[from] evolve::persistence::LogError),

    /// The report archive failed.
    #[error(transparent)]
    Report(#[from] evolve::report::ReportError),

    /// Metric construction or registration failed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
