//! # Implementation Lifecycle
//!
//! ## Responsibility
//! Drive one improvement through `SCOPING → IMPLEMENTING → ANALYZING →
//! INTEGRATING → ASSESSING → {COMPLETED | FAILED}` and fold everything that
//! happened into a [`CycleReport`].
//!
//! ## Guarantees
//! - Phases run strictly in order; a phase error aborts every later phase
//! - Results of phases that completed before a failure are kept in the report
//! - Every state change is recorded with its timestamp and the time spent in
//!   the state it left
//! - `overall_success_score` is always in `[0, 10]`, and `0` for a FAILED report
//!
//! ## NOT Responsible For
//! - Publishing artifacts or recording hashes (see `engine`)
//! - Choosing the improvement (see `selector`)

pub mod artifacts;
pub mod phases;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::guard::SpamRejected;
use super::scope::Scope;
use super::selector::Improvement;
use crate::metrics;

pub use artifacts::{Artifact, Language};
pub use phases::{
    AnalysisResult, BenefitAssessment, DeploymentStrategy, ImplementationResult,
    IntegrationResult, LifecyclePhases, StandardPhases, ValidationSummary,
};

// ─── State ────────────────────────────────────────────────────────────────────

/// Where a cycle is in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Building the scope.
    Scoping,
    /// Producing artifacts.
    Implementing,
    /// Estimating impact.
    Analyzing,
    /// Simulating integration.
    Integrating,
    /// Scoring benefits.
    Assessing,
    /// All phases succeeded.
    Completed,
    /// A phase failed.
    Failed,
}

impl LifecycleState {
    /// Uppercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Scoping => "SCOPING",
            Self::Implementing => "IMPLEMENTING",
            Self::Analyzing => "ANALYZING",
            Self::Integrating => "INTEGRATING",
            Self::Assessing => "ASSESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Return `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// State left.
    pub from: LifecycleState,
    /// State entered.
    pub to: LifecycleState,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// Time spent in `from`.
    pub duration_ms: u64,
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Why a cycle did not complete.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum LifecycleError {
    /// The guard refused every generated artifact.
    #[error("spam rejected: {0}")]
    SpamRejected(#[from] SpamRejected),

    /// Artifact generation failed.
    #[error("implementation error: {0}")]
    Implementation(String),

    /// Impact analysis failed.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Integration checks failed.
    #[error("integration error: {0}")]
    Integration(String),

    /// Benefit assessment failed.
    #[error("assessment error: {0}")]
    Assessment(String),

    /// Publishing the artifacts failed or timed out.
    #[error("publish error: {0}")]
    Publish(String),
}

impl LifecycleError {
    /// Short snake_case kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SpamRejected(_) => "spam_rejected",
            Self::Implementation(_) => "implementation",
            Self::Analysis(_) => "analysis",
            Self::Integration(_) => "integration",
            Self::Assessment(_) => "assessment",
            Self::Publish(_) => "publish",
        }
    }
}

/// A failure as captured in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedError {
    /// Phase that failed, or `PUBLISHING`.
    pub phase: String,
    /// Error kind.
    pub kind: String,
    /// Display text.
    pub message: String,
    /// The typed error.
    pub error: LifecycleError,
}

impl CapturedError {
    fn new(phase: &str, error: LifecycleError) -> Self {
        Self {
            phase: phase.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            error,
        }
    }
}

// ─── Report ───────────────────────────────────────────────────────────────────

/// Terminal status of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    /// Every phase succeeded.
    Completed,
    /// Some phase, or publishing, failed.
    Failed,
}

impl CycleStatus {
    /// Uppercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Everything one lifecycle run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Unique report id.
    pub id: String,
    /// The improvement worked on.
    pub improvement: Improvement,
    /// Terminal status.
    pub status: CycleStatus,
    /// Scoping result.
    pub scope: Option<Scope>,
    /// Implementing result.
    pub implementation: Option<ImplementationResult>,
    /// Analyzing result.
    pub analysis: Option<AnalysisResult>,
    /// Integrating result.
    pub integration: Option<IntegrationResult>,
    /// Assessing result.
    pub benefits: Option<BenefitAssessment>,
    /// Aggregate score in `[0, 10]`.
    pub overall_success_score: f64,
    /// What went wrong, for FAILED reports.
    pub error: Option<CapturedError>,
    /// State trail.
    pub transitions: Vec<Transition>,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub finished_at: DateTime<Utc>,
    /// Commit id once published.
    pub commit_id: Option<String>,
}

impl CycleReport {
    /// Return `true` if the guard refused every artifact.
    pub fn is_spam_rejected(&self) -> bool {
        matches!(
            self.error,
            Some(CapturedError {
                error: LifecycleError::SpamRejected(_),
                ..
            })
        )
    }

    /// Artifacts ready to publish; empty unless COMPLETED.
    pub fn artifacts(&self) -> &[Artifact] {
        match (&self.status, &self.implementation) {
            (CycleStatus::Completed, Some(i)) => &i.artifacts,
            _ => &[],
        }
    }

    /// Attach the commit id after a successful publish.
    pub fn into_published(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }

    /// Demote a COMPLETED report to FAILED after its publish failed.
    pub fn into_failed_publish(mut self, error: LifecycleError) -> Self {
        let now = Utc::now();
        self.transitions.push(Transition {
            from: LifecycleState::Completed,
            to: LifecycleState::Failed,
            at: now,
            duration_ms: millis_between(self.finished_at, now),
        });
        self.status = CycleStatus::Failed;
        self.overall_success_score = 0.0;
        self.error = Some(CapturedError::new("PUBLISHING", error));
        self.finished_at = now;
        self
    }

    /// Final state reached.
    pub fn final_state(&self) -> LifecycleState {
        match self.status {
            CycleStatus::Completed => LifecycleState::Completed,
            CycleStatus::Failed => LifecycleState::Failed,
        }
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

/// Mean of the five sub-scores, clamped to `[0, 10]`.
pub fn overall_success_score(
    implementation: &ImplementationResult,
    analysis: &AnalysisResult,
    integration: &IntegrationResult,
    benefits: &BenefitAssessment,
) -> f64 {
    let parts = [
        implementation.quality_score,
        analysis.success_rate * 10.0,
        integration.pass_ratio() * 10.0,
        benefits.competitive_score,
        f64::min(10.0, benefits.roi_pct / 20.0),
    ];
    let mean = parts.iter().sum::<f64>() / parts.len() as f64;
    if mean.is_finite() {
        mean.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

struct Trail {
    state: LifecycleState,
    entered: Instant,
    transitions: Vec<Transition>,
    improvement_id: String,
}

impl Trail {
    fn new(improvement_id: &str) -> Self {
        Self {
            state: LifecycleState::Scoping,
            entered: Instant::now(),
            transitions: Vec::new(),
            improvement_id: improvement_id.to_string(),
        }
    }

    fn advance(&mut self, to: LifecycleState) {
        let elapsed = self.entered.elapsed();
        metrics::record_phase_duration(self.state.label(), elapsed);
        debug!(
            improvement = %self.improvement_id,
            from = %self.state,
            to = %to,
            elapsed_ms = elapsed.as_millis() as u64,
            "lifecycle transition"
        );
        self.transitions.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        self.state = to;
        self.entered = Instant::now();
    }
}

/// Runs improvements through the phases.
#[derive(Clone)]
pub struct ImplementationLifecycle {
    phases: Arc<dyn LifecyclePhases>,
}

impl ImplementationLifecycle {
    /// Create a lifecycle over the given phases.
    pub fn new(phases: Arc<dyn LifecyclePhases>) -> Self {
        Self { phases }
    }

    /// Run every phase for `improvement`. Never fails: phase errors become a
    /// FAILED report.
    pub fn run(&self, improvement: &Improvement) -> CycleReport {
        let started_at = Utc::now();
        let mut trail = Trail::new(&improvement.id);
        let mut report = CycleReport {
            id: Uuid::new_v4().to_string(),
            improvement: improvement.clone(),
            status: CycleStatus::Failed,
            scope: None,
            implementation: None,
            analysis: None,
            integration: None,
            benefits: None,
            overall_success_score: 0.0,
            error: None,
            transitions: Vec::new(),
            started_at,
            finished_at: started_at,
            commit_id: None,
        };

        info!(
            improvement = %improvement.id,
            kind = %improvement.kind,
            description = %improvement.description,
            "lifecycle started"
        );

        let outcome = self.run_phases(improvement, &mut trail, &mut report);
        match outcome {
            Ok(score) => {
                trail.advance(LifecycleState::Completed);
                report.status = CycleStatus::Completed;
                report.overall_success_score = score;
                info!(improvement = %improvement.id, score, "lifecycle completed");
            }
            Err(e) => {
                let phase = trail.state;
                trail.advance(LifecycleState::Failed);
                if let LifecycleError::SpamRejected(reason) = &e {
                    warn!(improvement = %improvement.id, %reason, "artifacts rejected as spam");
                } else {
                    error!(improvement = %improvement.id, phase = %phase, err = %e, "lifecycle failed");
                }
                report.status = CycleStatus::Failed;
                report.overall_success_score = 0.0;
                report.error = Some(CapturedError::new(phase.label(), e));
            }
        }

        report.transitions = trail.transitions;
        report.finished_at = Utc::now();
        report
    }

    fn run_phases(
        &self,
        improvement: &Improvement,
        trail: &mut Trail,
        report: &mut CycleReport,
    ) -> Result<f64, LifecycleError> {
        let scope = self.phases.scope(improvement)?;
        trail.advance(LifecycleState::Implementing);
        let scope = report.scope.insert(scope);

        let implementation = self.phases.implement(scope)?;
        trail.advance(LifecycleState::Analyzing);
        let implementation = report.implementation.insert(implementation);

        let analysis = self.phases.analyze(scope, implementation)?;
        trail.advance(LifecycleState::Integrating);
        let analysis = report.analysis.insert(analysis);

        let integration = self.phases.integrate(scope, implementation, analysis)?;
        trail.advance(LifecycleState::Assessing);
        let integration = report.integration.insert(integration);

        let benefits = self
            .phases
            .assess_benefits(scope, implementation, analysis, integration)?;
        let benefits = report.benefits.insert(benefits);

        Ok(overall_success_score(
            implementation,
            analysis,
            integration,
            benefits,
        ))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolve::analyzer::FindingKind;
    use crate::evolve::guard::{ContentGuard, GuardConfig};
    use crate::evolve::store::MemoryIdStore;

    fn standard() -> (Arc<ContentGuard>, ImplementationLifecycle) {
        let guard = Arc::new(
            ContentGuard::new(GuardConfig::default(), Arc::new(MemoryIdStore::new())).unwrap(),
        );
        let lc = ImplementationLifecycle::new(Arc::new(StandardPhases::new(guard.clone())));
        (guard, lc)
    }

    fn eval_improvement() -> Improvement {
        Improvement::new(
            FindingKind::Security,
            "Unsafe dynamic code execution via eval() in app.py",
            1,
            "app.py",
            "dynamic-eval:app.py:1",
        )
    }

    /// Delegates to the standard phases but fails at `fail_at`.
    struct FailingPhases {
        inner: StandardPhases,
        fail_at: LifecycleState,
    }

    impl LifecyclePhases for FailingPhases {
        fn scope(&self, i: &Improvement) -> Result<Scope, LifecycleError> {
            self.inner.scope(i)
        }
        fn implement(&self, s: &Scope) -> Result<ImplementationResult, LifecycleError> {
            if self.fail_at == LifecycleState::Implementing {
                return Err(LifecycleError::Implementation("boom".into()));
            }
            self.inner.implement(s)
        }
        fn analyze(
            &self,
            s: &Scope,
            i: &ImplementationResult,
        ) -> Result<AnalysisResult, LifecycleError> {
            if self.fail_at == LifecycleState::Analyzing {
                return Err(LifecycleError::Analysis("boom".into()));
            }
            self.inner.analyze(s, i)
        }
        fn integrate(
            &self,
            s: &Scope,
            i: &ImplementationResult,
            a: &AnalysisResult,
        ) -> Result<IntegrationResult, LifecycleError> {
            if self.fail_at == LifecycleState::Integrating {
                return Err(LifecycleError::Integration("boom".into()));
            }
            self.inner.integrate(s, i, a)
        }
        fn assess_benefits(
            &self,
            s: &Scope,
            i: &ImplementationResult,
            a: &AnalysisResult,
            r: &IntegrationResult,
        ) -> Result<BenefitAssessment, LifecycleError> {
            if self.fail_at == LifecycleState::Assessing {
                return Err(LifecycleError::Assessment("boom".into()));
            }
            self.inner.assess_benefits(s, i, a, r)
        }
    }

    fn failing(at: LifecycleState) -> ImplementationLifecycle {
        let guard = Arc::new(
            ContentGuard::new(GuardConfig::default(), Arc::new(MemoryIdStore::new())).unwrap(),
        );
        ImplementationLifecycle::new(Arc::new(FailingPhases {
            inner: StandardPhases::new(guard),
            fail_at: at,
        }))
    }

    #[test]
    fn test_full_run_completes_with_bounded_score() {
        let (_, lc) = standard();
        let report = lc.run(&eval_improvement());
        assert_eq!(report.status, CycleStatus::Completed);
        assert!(report.error.is_none());
        assert!(report.benefits.is_some());
        assert!((0.0..=10.0).contains(&report.overall_success_score));
        assert!(report.overall_success_score > 0.0);
        assert_eq!(report.artifacts().len(), 2);
    }

    #[test]
    fn test_transition_trail_in_order() {
        let (_, lc) = standard();
        let report = lc.run(&eval_improvement());
        let states: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                LifecycleState::Implementing,
                LifecycleState::Analyzing,
                LifecycleState::Integrating,
                LifecycleState::Assessing,
                LifecycleState::Completed,
            ]
        );
        assert_eq!(report.transitions[0].from, LifecycleState::Scoping);
    }

    #[test]
    fn test_failure_keeps_earlier_results_only() {
        let report = failing(LifecycleState::Integrating).run(&eval_improvement());
        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.overall_success_score, 0.0);
        assert!(report.scope.is_some());
        assert!(report.implementation.is_some());
        assert!(report.analysis.is_some());
        assert!(report.integration.is_none());
        assert!(report.benefits.is_none());
        let err = report.error.as_ref().unwrap();
        assert_eq!(err.phase, "INTEGRATING");
        assert_eq!(err.kind, "integration");
        assert!(report.artifacts().is_empty());
        assert_eq!(
            report.transitions.last().map(|t| t.to),
            Some(LifecycleState::Failed)
        );
    }

    #[test]
    fn test_failure_at_each_phase_is_captured() {
        for (state, kind) in [
            (LifecycleState::Implementing, "implementation"),
            (LifecycleState::Analyzing, "analysis"),
            (LifecycleState::Assessing, "assessment"),
        ] {
            let report = failing(state).run(&eval_improvement());
            assert_eq!(report.status, CycleStatus::Failed);
            let err = report.error.unwrap();
            assert_eq!(err.phase, state.label());
            assert_eq!(err.kind, kind);
        }
    }

    #[test]
    fn test_spam_rejected_when_hashes_already_recorded() {
        let (guard, lc) = standard();
        let first = lc.run(&eval_improvement());
        for adm in &first.implementation.as_ref().unwrap().validation.admitted {
            guard.record(adm).unwrap();
        }
        let second = lc.run(&eval_improvement());
        assert_eq!(second.status, CycleStatus::Failed);
        assert!(second.is_spam_rejected());
        assert!(second.implementation.is_none());
    }

    #[test]
    fn test_into_failed_publish_zeroes_score() {
        let (_, lc) = standard();
        let report = lc
            .run(&eval_improvement())
            .into_failed_publish(LifecycleError::Publish("timeout".into()));
        assert_eq!(report.status, CycleStatus::Failed);
        assert_eq!(report.overall_success_score, 0.0);
        assert_eq!(report.error.as_ref().unwrap().phase, "PUBLISHING");
        assert_eq!(report.final_state(), LifecycleState::Failed);
    }

    #[test]
    fn test_into_published_sets_commit() {
        let (_, lc) = standard();
        let report = lc.run(&eval_improvement()).into_published("abc123");
        assert_eq!(report.commit_id.as_deref(), Some("abc123"));
        assert_eq!(report.status, CycleStatus::Completed);
    }

    #[test]
    fn test_report_json_roundtrip() {
        let (_, lc) = standard();
        let report = lc.run(&eval_improvement());
        let json = serde_json::to_string(&report).unwrap();
        let back: CycleReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, report.id);
        assert_eq!(back.status, CycleStatus::Completed);
        assert_eq!(back.scope, report.scope);
        assert_eq!(back.transitions.len(), report.transitions.len());
    }
}
