//! # Lifecycle Phases
//!
//! ## Responsibility
//! The five phase computations and their typed results. [`LifecyclePhases`]
//! is the seam the lifecycle driver calls through; [`StandardPhases`] is the
//! production implementation and tests substitute their own to force
//! failures at a chosen phase.
//!
//! ## Guarantees
//! - Every phase is deterministic for a given scope and guard state
//! - `implement` screens artifacts but never records their hashes
//! - Scores stay inside their documented ranges
//!
//! ## NOT Responsible For
//! - Recording state transitions (see `lifecycle`)
//! - Publishing artifacts (see `publisher`)

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::artifacts::{self, Artifact};
use super::LifecycleError;
use crate::evolve::guard::{Admission, ContentGuard, SpamRejected};
use crate::evolve::scope::{Effort, PriorityLevel, Scope, ScopeBuilder};
use crate::evolve::selector::Improvement;

// ─── Implementation ───────────────────────────────────────────────────────────

/// An artifact the guard refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedArtifact {
    /// Artifact path.
    pub path: String,
    /// Why it was refused.
    pub reason: SpamRejected,
}

/// Outcome of the static checks run on generated artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Artifacts that passed the guard, with the hash to record on publish.
    pub admitted: Vec<Admission>,
    /// Artifacts the guard refused.
    pub rejected: Vec<RejectedArtifact>,
    /// All delimiters balanced.
    pub delimiters_balanced: bool,
}

/// Result of the implementing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationResult {
    /// Paths of admitted artifacts.
    pub files_created: Vec<String>,
    /// Existing files the change touches.
    pub files_modified: Vec<String>,
    /// Non-blank, non-comment lines across admitted artifacts.
    pub lines_of_code: u32,
    /// Function definitions in the module artifact.
    pub functions_added: u32,
    /// Type definitions in the module artifact.
    pub classes_added: u32,
    /// Test functions in the test artifact.
    pub tests_created: u32,
    /// Rubric score in `[0, 10]`.
    pub quality_score: f64,
    /// Static checks.
    pub validation: ValidationSummary,
    /// Admitted artifacts, ready to publish.
    pub artifacts: Vec<Artifact>,
}

// ─── Analysis ─────────────────────────────────────────────────────────────────

/// Expected effect on request handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceImpact {
    /// Estimated latency change in percent; negative is faster.
    pub latency_change_pct: f64,
    /// Estimated throughput change in percent.
    pub throughput_change_pct: f64,
}

/// Expected memory footprint of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Estimated additional resident memory.
    pub estimated_kb: u64,
    /// Whether the footprint grows with traffic.
    pub grows_with_load: bool,
}

/// Compatibility verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    /// No caller needs to change.
    pub backward_compatible: bool,
    /// Human-readable notes.
    pub notes: Vec<String>,
}

/// Security verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    /// The change removes a known weakness.
    pub mitigates_vulnerability: bool,
    /// The change adds new attack surface.
    pub introduces_risk: bool,
    /// Human-readable notes.
    pub notes: Vec<String>,
}

/// Result of the analyzing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Request-path impact.
    pub performance_impact: PerformanceImpact,
    /// Memory footprint.
    pub memory_usage: MemoryUsage,
    /// CPU impact in percent; negative is a saving.
    pub cpu_impact_pct: f64,
    /// Compatibility verdict.
    pub compatibility: Compatibility,
    /// Predicted success rate in `[0, 1]`.
    pub success_rate: f64,
    /// Predicted error rate in `[0, 1]`.
    pub error_rate: f64,
    /// Security verdict.
    pub security_assessment: SecurityAssessment,
}

// ─── Integration ──────────────────────────────────────────────────────────────

/// How the change is rolled out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Immediate out-of-band release.
    Hotfix,
    /// Small traffic slice first.
    Canary,
    /// Gradual instance-by-instance rollout.
    Rolling,
}

impl DeploymentStrategy {
    fn for_priority(p: PriorityLevel) -> Self {
        match p {
            PriorityLevel::Critical => Self::Hotfix,
            PriorityLevel::High => Self::Canary,
            PriorityLevel::Medium => Self::Rolling,
        }
    }

    fn rollback_plan(self) -> &'static str {
        match self {
            Self::Hotfix => "Revert the commit and redeploy the previous build immediately.",
            Self::Canary => "Route canary traffic back to the stable pool and revert the commit.",
            Self::Rolling => "Halt the rollout and redeploy the previous build to updated instances.",
        }
    }
}

/// Result of the integrating phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationResult {
    /// Tests that passed.
    pub tests_passed: u32,
    /// Tests that failed.
    pub tests_failed: u32,
    /// Compatible and failure-free.
    pub system_compatible: bool,
    /// What to do if the change misbehaves.
    pub rollback_plan: String,
    /// Rollout strategy.
    pub deployment_strategy: DeploymentStrategy,
}

impl IntegrationResult {
    /// Fraction of tests that passed; `0.0` when none ran.
    pub fn pass_ratio(&self) -> f64 {
        let total = self.tests_passed + self.tests_failed;
        if total == 0 {
            0.0
        } else {
            f64::from(self.tests_passed) / f64::from(total)
        }
    }
}

// ─── Benefits ─────────────────────────────────────────────────────────────────

/// Benefits visible right after release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImmediateBenefits {
    /// Exposure removed.
    pub risk_reduced: bool,
    /// Expected latency improvement in percent.
    pub latency_improvement_pct: f64,
    /// Short statements.
    pub highlights: Vec<String>,
}

/// Benefits that accrue over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermBenefits {
    /// Expected reduction in maintenance effort, in percent.
    pub maintenance_reduction_pct: f64,
    /// Supports growth in traffic without rework.
    pub improves_scalability: bool,
    /// Short statements.
    pub highlights: Vec<String>,
}

/// Result of the assessing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenefitAssessment {
    /// Short-horizon benefits.
    pub immediate_benefits: ImmediateBenefits,
    /// Long-horizon benefits.
    pub long_term_benefits: LongTermBenefits,
    /// User experience score in `[0, 10]`.
    pub ux_score: f64,
    /// Performance gain in percent.
    pub performance_gain: f64,
    /// Security gain in percent.
    pub security_gain: f64,
    /// Maintainability gain in percent.
    pub maintainability_gain: f64,
    /// Competitive score in `[0, 10]`.
    pub competitive_score: f64,
    /// Return on investment in percent, at most 300.
    pub roi_pct: f64,
    /// What to watch after release.
    pub success_indicators: Vec<String>,
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// The five lifecycle phases.
pub trait LifecyclePhases: Send + Sync {
    /// Build the scope for an improvement.
    fn scope(&self, improvement: &Improvement) -> Result<Scope, LifecycleError>;

    /// Produce and screen artifacts.
    fn implement(&self, scope: &Scope) -> Result<ImplementationResult, LifecycleError>;

    /// Estimate runtime impact.
    fn analyze(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
    ) -> Result<AnalysisResult, LifecycleError>;

    /// Simulate integration testing.
    fn integrate(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
        analysis: &AnalysisResult,
    ) -> Result<IntegrationResult, LifecycleError>;

    /// Score the benefits.
    fn assess_benefits(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
        analysis: &AnalysisResult,
        integration: &IntegrationResult,
    ) -> Result<BenefitAssessment, LifecycleError>;
}

// ─── Standard implementation ──────────────────────────────────────────────────

const PERF_WORDS: &[&str] = &["performance", "cach", "sleep", "latency", "select"];
const RESILIENCE_WORDS: &[&str] = &["timeout", "retry", "rate limit"];
const SECURITY_WORDS: &[&str] = &[
    "security",
    "unsafe",
    "injection",
    "credential",
    "secret",
    "deserializ",
    "validation",
];
const OBSERVABILITY_WORDS: &[&str] = &["monitoring", "logging", "metric", "health"];

fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

/// Production phases: artifact synthesis screened by a [`ContentGuard`], and
/// keyword heuristics for analysis and assessment.
pub struct StandardPhases {
    guard: Arc<ContentGuard>,
    scopes: ScopeBuilder,
}

impl StandardPhases {
    /// Create phases that screen artifacts through `guard`.
    pub fn new(guard: Arc<ContentGuard>) -> Self {
        Self {
            guard,
            scopes: ScopeBuilder::new(),
        }
    }
}

impl LifecyclePhases for StandardPhases {
    fn scope(&self, improvement: &Improvement) -> Result<Scope, LifecycleError> {
        Ok(self.scopes.build(improvement))
    }

    fn implement(&self, scope: &Scope) -> Result<ImplementationResult, LifecycleError> {
        let generated = artifacts::synthesize(scope);

        for a in &generated {
            if let Err(imb) = artifacts::check_balance(&a.content) {
                return Err(LifecycleError::Implementation(format!(
                    "unbalanced delimiter {:?} at {}:{}",
                    imb.found, a.path, imb.line
                )));
            }
        }

        let verdicts = self
            .guard
            .screen_batch(generated.iter().map(|a| (a.path.as_str(), a.content.as_str())));

        let mut validation = ValidationSummary {
            delimiters_balanced: true,
            ..ValidationSummary::default()
        };
        let mut kept = Vec::new();
        for (artifact, verdict) in generated.into_iter().zip(verdicts) {
            match verdict {
                Ok(admission) => {
                    validation.admitted.push(admission);
                    kept.push(artifact);
                }
                Err(reason) => validation.rejected.push(RejectedArtifact {
                    path: artifact.path,
                    reason,
                }),
            }
        }

        if kept.is_empty() {
            let reason = validation
                .rejected
                .first()
                .map(|r| r.reason.clone())
                .unwrap_or(SpamRejected::EmptyName);
            return Err(LifecycleError::SpamRejected(reason));
        }

        let stats = artifacts::source_stats(&kept);
        let files_modified = if scope.target.contains('.') {
            vec![scope.target.clone()]
        } else {
            Vec::new()
        };

        Ok(ImplementationResult {
            files_created: kept.iter().map(|a| a.path.clone()).collect(),
            files_modified,
            lines_of_code: stats.lines_of_code,
            functions_added: stats.functions,
            classes_added: stats.types,
            tests_created: stats.tests,
            quality_score: artifacts::quality_score(&stats),
            validation,
            artifacts: kept,
        })
    }

    fn analyze(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
    ) -> Result<AnalysisResult, LifecycleError> {
        if implementation.artifacts.is_empty() || implementation.lines_of_code == 0 {
            return Err(LifecycleError::Analysis(
                "implementation produced no code".to_string(),
            ));
        }

        let d = scope.description.to_lowercase();
        let base = if mentions(&d, &["performance", "cach", "sleep"]) {
            -15.0
        } else if mentions(&d, &["monitoring", "logging"]) {
            3.0
        } else if mentions(&d, &["security", "validation"]) {
            2.0
        } else {
            5.0
        };
        let loc = f64::from(implementation.lines_of_code);
        let cpu_impact_pct = base + f64::min(5.0, loc / 100.0);

        let critical_bonus = if scope.priority_level == PriorityLevel::Critical {
            0.02
        } else {
            0.0
        };
        let success_rate =
            (0.85 + implementation.quality_score * 0.01 + critical_bonus).clamp(0.0, 0.99);
        let error_rate = (1.0 - success_rate) / 2.0;

        let estimated_kb = u64::from(implementation.lines_of_code) * 2
            + u64::from(implementation.classes_added) * 16;

        let mut compat_notes = Vec::new();
        for f in &implementation.files_modified {
            compat_notes.push(format!("touches existing file {f}"));
        }
        if compat_notes.is_empty() {
            compat_notes.push("adds new modules only".to_string());
        }

        let mitigates = mentions(&d, SECURITY_WORDS) || mentions(&d, &["eval", "exec"]);
        let security_notes = if mitigates {
            vec![format!("removes exposure described as: {}", scope.description)]
        } else {
            Vec::new()
        };

        Ok(AnalysisResult {
            performance_impact: PerformanceImpact {
                latency_change_pct: cpu_impact_pct * 0.8,
                throughput_change_pct: -cpu_impact_pct * 0.5,
            },
            memory_usage: MemoryUsage {
                estimated_kb,
                grows_with_load: d.contains("cach"),
            },
            cpu_impact_pct,
            compatibility: Compatibility {
                backward_compatible: true,
                notes: compat_notes,
            },
            success_rate,
            error_rate,
            security_assessment: SecurityAssessment {
                mitigates_vulnerability: mitigates,
                introduces_risk: false,
                notes: security_notes,
            },
        })
    }

    fn integrate(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
        analysis: &AnalysisResult,
    ) -> Result<IntegrationResult, LifecycleError> {
        let base = match scope.priority_level {
            PriorityLevel::Critical => 12,
            PriorityLevel::High => 10,
            PriorityLevel::Medium => 8,
        };
        let total = base + implementation.tests_created;
        let tests_failed = u32::from(analysis.error_rate > 0.1);
        let strategy = DeploymentStrategy::for_priority(scope.priority_level);

        let result = IntegrationResult {
            tests_passed: total - tests_failed,
            tests_failed,
            system_compatible: analysis.compatibility.backward_compatible && tests_failed == 0,
            rollback_plan: strategy.rollback_plan().to_string(),
            deployment_strategy: strategy,
        };

        if result.pass_ratio() < 0.5 {
            return Err(LifecycleError::Integration(format!(
                "pass ratio {:.2} below 0.50",
                result.pass_ratio()
            )));
        }
        Ok(result)
    }

    fn assess_benefits(
        &self,
        scope: &Scope,
        implementation: &ImplementationResult,
        analysis: &AnalysisResult,
        _integration: &IntegrationResult,
    ) -> Result<BenefitAssessment, LifecycleError> {
        let d = scope.description.to_lowercase();

        let performance_gain = if mentions(&d, PERF_WORDS) {
            25.0
        } else if mentions(&d, RESILIENCE_WORDS) {
            10.0
        } else {
            5.0
        };
        let security_gain = if mentions(&d, SECURITY_WORDS) || mentions(&d, &["eval", "exec"]) {
            30.0
        } else {
            0.0
        };
        let maintainability_gain = if mentions(&d, OBSERVABILITY_WORDS) {
            20.0
        } else {
            10.0
        };

        let effort_factor = match scope.estimated_effort {
            Effort::Small => 1.0,
            Effort::Medium => 2.0,
            Effort::Large => 3.0,
        };
        let roi_pct = f64::min(
            300.0,
            (performance_gain + security_gain + maintainability_gain) * 3.0 / effort_factor,
        );

        let multiplier = match scope.priority_level {
            PriorityLevel::Critical => 1.0,
            PriorityLevel::High => 0.9,
            PriorityLevel::Medium => 0.75,
        };
        let competitive_score = f64::min(
            10.0,
            (implementation.quality_score * 0.6 + analysis.success_rate * 4.0) * multiplier,
        );
        let ux_score = f64::min(10.0, 5.0 + (performance_gain + security_gain) / 10.0);

        if ![roi_pct, competitive_score, ux_score]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(LifecycleError::Assessment(
                "benefit scores are not finite".to_string(),
            ));
        }

        let mut immediate = Vec::new();
        if security_gain > 0.0 {
            immediate.push("known weakness removed".to_string());
        }
        if performance_gain >= 10.0 {
            immediate.push(format!("about {performance_gain:.0}% faster on affected paths"));
        }
        if immediate.is_empty() {
            immediate.push("cleaner behavior on affected paths".to_string());
        }

        let mut long_term = vec![scope.user_benefit.clone()];
        if mentions(&d, OBSERVABILITY_WORDS) {
            long_term.push("shorter incident investigations".to_string());
        }

        Ok(BenefitAssessment {
            immediate_benefits: ImmediateBenefits {
                risk_reduced: security_gain > 0.0,
                latency_improvement_pct: f64::max(0.0, -analysis.performance_impact.latency_change_pct),
                highlights: immediate,
            },
            long_term_benefits: LongTermBenefits {
                maintenance_reduction_pct: maintainability_gain,
                improves_scalability: mentions(&d, PERF_WORDS) || mentions(&d, RESILIENCE_WORDS),
                highlights: long_term,
            },
            ux_score,
            performance_gain,
            security_gain,
            maintainability_gain,
            competitive_score,
            roi_pct,
            success_indicators: scope.success_metrics.clone(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
