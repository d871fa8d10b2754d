//! # Improvement Selector
//!
//! Turns analyzer findings into the single next [`Improvement`] to work on.
//!
//! Selection order is fixed: security, then performance, then architecture,
//! then style. Within a kind, findings are visited in analyzer order and the
//! first one whose derived id is not yet completed wins. When no finding
//! qualifies, the selector falls back to an ordered list of generic
//! [`ImprovementTemplate`]s. `None` means both sources are exhausted.
//!
//! Improvement ids are a stable hash of kind and description, so every finding
//! of one rule in one file maps to the same improvement.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::analyzer::{Finding, FindingKind};
use super::store::IdStore;

/// Priority assigned to template improvements.
pub const TEMPLATE_PRIORITY: u32 = 5;

/// A deduplicated unit of proposed change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Improvement {
    /// First 16 hex chars of `sha256("<kind>:<description>")`.
    pub id: String,
    /// Category.
    pub kind: FindingKind,
    /// What the improvement does.
    pub description: String,
    /// Lower is more urgent.
    pub priority: u32,
    /// File path for finding-derived improvements, area name for templates.
    pub target: String,
    /// Finding id or template name this came from.
    pub source: String,
}

impl Improvement {
    /// Build an improvement, deriving its id.
    pub fn new(
        kind: FindingKind,
        description: impl Into<String>,
        priority: u32,
        target: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            id: improvement_id(kind, &description),
            kind,
            description,
            priority,
            target: target.into(),
            source: source.into(),
        }
    }

    /// Derive the improvement for a finding.
    pub fn from_finding(finding: &Finding) -> Self {
        Self::new(
            finding.kind,
            finding.description.clone(),
            kind_priority(finding.kind),
            finding.file_path.clone(),
            finding.id.clone(),
        )
    }

    /// Return `true` if this came from a generic template.
    pub fn is_template(&self) -> bool {
        self.priority >= TEMPLATE_PRIORITY
    }
}

/// Stable id for a kind/description pair.
pub fn improvement_id(kind: FindingKind, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.label().as_bytes());
    hasher.update(b":");
    hasher.update(description.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

fn kind_priority(kind: FindingKind) -> u32 {
    match kind {
        FindingKind::Security => 1,
        FindingKind::Performance => 2,
        FindingKind::Architecture => 3,
        FindingKind::Style => 4,
    }
}

// ─── Templates ────────────────────────────────────────────────────────────────

/// A generic improvement offered when no finding is pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImprovementTemplate {
    /// Short name, used as the improvement source.
    pub name: &'static str,
    /// Category.
    pub kind: FindingKind,
    /// Improvement description.
    pub description: &'static str,
    /// Area of the system it targets.
    pub target: &'static str,
}

impl ImprovementTemplate {
    /// Materialize as an improvement.
    pub fn to_improvement(&self) -> Improvement {
        Improvement::new(
            self.kind,
            self.description,
            TEMPLATE_PRIORITY,
            self.target,
            self.name,
        )
    }
}

/// The built-in fallback list, in offer order.
pub fn default_templates() -> Vec<ImprovementTemplate> {
    vec![
        ImprovementTemplate {
            name: "monitoring",
            kind: FindingKind::Architecture,
            description: "Add comprehensive monitoring and health metrics",
            target: "observability",
        },
        ImprovementTemplate {
            name: "caching",
            kind: FindingKind::Performance,
            description: "Implement intelligent caching layer for repeated lookups",
            target: "performance",
        },
        ImprovementTemplate {
            name: "rate-limiting",
            kind: FindingKind::Architecture,
            description: "Add rate limiting to protect external interfaces",
            target: "interfaces",
        },
        ImprovementTemplate {
            name: "structured-logging",
            kind: FindingKind::Architecture,
            description: "Add structured logging with request correlation ids",
            target: "observability",
        },
        ImprovementTemplate {
            name: "retry-backoff",
            kind: FindingKind::Architecture,
            description: "Add retry with exponential backoff for outbound calls",
            target: "resilience",
        },
        ImprovementTemplate {
            name: "input-validation",
            kind: FindingKind::Security,
            description: "Add input validation at public entry points",
            target: "interfaces",
        },
        ImprovementTemplate {
            name: "health-checks",
            kind: FindingKind::Architecture,
            description: "Add liveness and readiness health checks",
            target: "operations",
        },
    ]
}

// ─── Selector ─────────────────────────────────────────────────────────────────

/// Picks the next not-yet-completed improvement.
#[derive(Debug, Clone)]
pub struct ImprovementSelector {
    templates: Vec<ImprovementTemplate>,
    use_fallback: bool,
}

impl Default for ImprovementSelector {
    fn default() -> Self {
        Self::new(default_templates(), true)
    }
}

impl ImprovementSelector {
    /// Create a selector with an explicit template list.
    pub fn new(templates: Vec<ImprovementTemplate>, use_fallback: bool) -> Self {
        Self {
            templates,
            use_fallback,
        }
    }

    /// A selector that only ever offers finding-derived improvements.
    pub fn findings_only() -> Self {
        Self::new(Vec::new(), false)
    }

    /// The next improvement to work on, or `None` once everything is done.
    pub fn next(&self, findings: &[Finding], completed: &dyn IdStore) -> Option<Improvement> {
        for kind in FindingKind::ALL {
            let hit = findings
                .iter()
                .filter(|f| f.kind == kind)
                .map(Improvement::from_finding)
                .find(|imp| !completed.contains(&imp.id));
            if hit.is_some() {
                return hit;
            }
        }

        self.fallback()
            .map(ImprovementTemplate::to_improvement)
            .find(|imp| !completed.contains(&imp.id))
    }

    /// Every improvement still pending, in the order [`next`](Self::next)
    /// would return them, without duplicates.
    pub fn pending(&self, findings: &[Finding], completed: &dyn IdStore) -> Vec<Improvement> {
        let mut out: Vec<Improvement> = Vec::new();
        let mut push = |imp: Improvement| {
            if !completed.contains(&imp.id) && !out.iter().any(|o| o.id == imp.id) {
                out.push(imp);
            }
        };
        for kind in FindingKind::ALL {
            findings
                .iter()
                .filter(|f| f.kind == kind)
                .map(Improvement::from_finding)
                .for_each(&mut push);
        }
        self.fallback()
            .map(ImprovementTemplate::to_improvement)
            .for_each(&mut push);
        out
    }

    fn fallback(&self) -> impl Iterator<Item = &ImprovementTemplate> {
        let n = if self.use_fallback {
            self.templates.len()
        } else {
            0
        };
        self.templates.iter().take(n)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
