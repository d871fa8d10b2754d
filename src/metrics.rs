//! Prometheus metrics for the evolution engine.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_cycle`, `inc_spam_rejected`, …) are no-ops if `init_metrics` was
//! never called, so the engine is always safe to run and observability simply
//! degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `evolution_cycles_total` | Counter | `status` |
//! | `evolution_spam_rejected_total` | Counter | |
//! | `evolution_findings_total` | Counter | `kind` |
//! | `evolution_cycle_score` | Histogram | |
//! | `evolution_phase_duration_seconds` | Histogram | `phase` |

use crate::EngineError;
use prometheus::{
    core::Collector, Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the engine, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Cycles by terminal outcome.
    pub cycles_total: CounterVec,
    /// Cycles whose artifacts were all refused by the content guard.
    pub spam_rejected: Counter,
    /// Findings reported by scans, by kind.
    pub findings_total: CounterVec,
    /// Overall score of finished cycles.
    pub cycle_score: Histogram,
    /// Time spent in each lifecycle phase.
    pub phase_duration: HistogramVec,
}

impl Metrics {
    fn build(prefix: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            Opts::new(
                format!("{prefix}_cycles_total"),
                "Evolution cycles by outcome",
            ),
            &["status"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let spam_rejected = Counter::new(
            format!("{prefix}_spam_rejected_total"),
            "Cycles whose artifacts were all rejected as spam",
        )?;
        registry.register(Box::new(spam_rejected.clone()))?;

        let findings_total = CounterVec::new(
            Opts::new(
                format!("{prefix}_findings_total"),
                "Findings reported by scans",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(findings_total.clone()))?;

        let cycle_score = Histogram::with_opts(
            HistogramOpts::new(
                format!("{prefix}_cycle_score"),
                "Overall success score of finished cycles",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]),
        )?;
        registry.register(Box::new(cycle_score.clone()))?;

        let phase_duration = HistogramVec::new(
            HistogramOpts::new(
                format!("{prefix}_phase_duration_seconds"),
                "Time spent in each lifecycle phase",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(phase_duration.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            spam_rejected,
            findings_total,
            cycle_score,
            phase_duration,
        })
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`EngineError::Metrics`] if metric construction or registration
/// fails.
pub fn init_metrics() -> Result<(), EngineError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = Metrics::build("evolution")
        .map_err(|e| EngineError::Metrics(format!("metrics init failed: {e}")))?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Record a finished cycle. `status` is `"completed"`, `"failed"`, …
///
/// No-op if metrics have not been initialised.
pub fn record_cycle(status: &str, score: f64) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.cycles_total.get_metric_with_label_values(&[status]) {
            c.inc();
        }
        m.cycle_score.observe(score);
    }
}

/// Count a cycle whose artifacts were all rejected.
///
/// No-op if metrics have not been initialised.
pub fn inc_spam_rejected() {
    if let Some(m) = metrics() {
        m.spam_rejected.inc();
    }
}

/// Count scan findings of one kind.
///
/// No-op if metrics have not been initialised.
pub fn add_findings(kind: &str, n: u64) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.findings_total.get_metric_with_label_values(&[kind]) {
            c.inc_by(n as f64);
        }
    }
}

/// Record time spent in a lifecycle phase.
///
/// No-op if metrics have not been initialised.
pub fn record_phase_duration(phase: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.phase_duration.get_metric_with_label_values(&[phase]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Gather all registered metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Cycle counts keyed by status label.
///
/// Returns an empty map if metrics have not been initialised.
pub fn cycle_counts() -> HashMap<String, u64> {
    let Some(m) = metrics() else {
        return HashMap::new();
    };
    let mut out = HashMap::new();
    for family in m.cycles_total.collect() {
        for metric in family.get_metric() {
            let status = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == "status")
                .map_or("unknown", |l| l.get_value());
            out.insert(status.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The global `METRICS` cannot be reset between tests, so tests that check
    /// exact values build an isolated bundle instead.
    fn make_test_metrics() -> Metrics {
        Metrics::build("t").expect("isolated metrics must build")
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_helpers_before_or_after_init_do_not_panic() {
        record_cycle("completed", 7.5);
        inc_spam_rejected();
        add_findings("security", 2);
        record_phase_duration("SCOPING", Duration::from_millis(3));
    }

    #[test]
    fn test_isolated_counters_accumulate() {
        let m = make_test_metrics();
        m.cycles_total
            .get_metric_with_label_values(&["completed"])
            .unwrap()
            .inc();
        m.cycles_total
            .get_metric_with_label_values(&["completed"])
            .unwrap()
            .inc();
        m.spam_rejected.inc();
        let value = m
            .cycles_total
            .get_metric_with_label_values(&["completed"])
            .unwrap()
            .get();
        assert!((value - 2.0).abs() < f64::EPSILON);
        assert!((m.spam_rejected.get() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_isolated_registry_exposes_all_families() {
        let m = make_test_metrics();
        m.cycle_score.observe(5.0);
        m.phase_duration
            .get_metric_with_label_values(&["ANALYZING"])
            .unwrap()
            .observe(0.01);
        m.findings_total
            .get_metric_with_label_values(&["style"])
            .unwrap()
            .inc();
        let names: Vec<String> = m
            .registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"t_cycle_score".to_string()));
        assert!(names.contains(&"t_phase_duration_seconds".to_string()));
        assert!(names.contains(&"t_findings_total".to_string()));
    }

    #[test]
    fn test_gather_metrics_text_after_init() {
        init_metrics().unwrap();
        record_cycle("completed", 9.0);
        let text = gather_metrics();
        assert!(text.contains("evolution_cycles_total"));
        assert!(cycle_counts().get("completed").copied().unwrap_or(0) >= 1);
    }
}
