//! # Scope Builder
//!
//! Maps an [`Improvement`] to a structured [`Scope`] through keyword lookup
//! tables. Each field has its own ordered table; keywords are matched as
//! lowercase substrings of the improvement description, the first matching
//! row wins, and every table has an explicit fallback.
//!
//! The heuristics are crude on purpose and must stay stable: the same
//! improvement always produces the same scope (apart from `created_at`, which
//! [`ScopeBuilder::build_at`] takes explicitly).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analyzer::FindingKind;
use super::selector::Improvement;

/// Urgency derived from the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityLevel {
    /// Exploitable or data-losing.
    Critical,
    /// Visible to users or operators.
    High,
    /// Everything else.
    Medium,
}

impl PriorityLevel {
    /// Uppercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
        }
    }
}

/// Effort bucket derived from description length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effort {
    /// Under 50 characters.
    Small,
    /// Under 100 characters.
    Medium,
    /// Everything longer.
    Large,
}

impl Effort {
    /// Uppercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
        }
    }
}

/// Business and technical framing for one improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Id of the scoped improvement.
    pub improvement_id: String,
    /// Copied from the improvement.
    pub description: String,
    /// Copied from the improvement.
    pub kind: FindingKind,
    /// Copied from the improvement.
    pub target: String,
    /// Why the business should care.
    pub business_justification: String,
    /// What it does for competitive position.
    pub competitive_advantage: String,
    /// The capability currently missing.
    pub capability_gap: String,
    /// What the implementation must provide.
    pub technical_requirements: Vec<String>,
    /// How success is measured.
    pub success_metrics: Vec<String>,
    /// Urgency.
    pub priority_level: PriorityLevel,
    /// Size.
    pub estimated_effort: Effort,
    /// What could go wrong.
    pub risk_factors: Vec<String>,
    /// What it relies on.
    pub dependencies: Vec<String>,
    /// Effect on the product's market.
    pub market_impact: String,
    /// Effect on end users.
    pub user_benefit: String,
    /// When the scope was built.
    pub created_at: DateTime<Utc>,
}

// ─── Lookup tables ────────────────────────────────────────────────────────────

type TextTable = &'static [(&'static [&'static str], &'static str)];
type ListTable = &'static [(&'static [&'static str], &'static [&'static str])];

const SECURITY_WORDS: &[&str] = &[
    "security",
    "critical",
    "unsafe",
    "injection",
    "vulnerab",
    "credential",
    "secret",
];
const PERFORMANCE_WORDS: &[&str] = &[
    "performance",
    "monitoring",
    "cach",
    "latency",
    "sleep",
    "timeout",
];

const BUSINESS_JUSTIFICATION: TextTable = &[
    (
        &["unsafe", "injection", "credential", "secret", "security", "deserializ"],
        "Eliminates an exploitable weakness that exposes user data and erodes customer trust.",
    ),
    (
        &["performance", "cach", "sleep", "latency", "select"],
        "Reduces response latency and infrastructure cost under peak load.",
    ),
    (
        &["monitoring", "metric", "logging", "health"],
        "Gives operators early warning of failures before customers notice them.",
    ),
    (
        &["timeout", "retry", "rate limit"],
        "Prevents cascading failures when upstream dependencies degrade.",
    ),
    (
        &["validation", "input"],
        "Rejects malformed input at the boundary before it corrupts downstream state.",
    ),
];
const DEFAULT_BUSINESS_JUSTIFICATION: &str =
    "Improves code quality and reduces long-term maintenance cost.";

const COMPETITIVE_ADVANTAGE: TextTable = &[
    (
        &["unsafe", "injection", "credential", "secret", "security"],
        "Security posture that passes enterprise procurement reviews.",
    ),
    (
        &["performance", "cach", "sleep", "latency"],
        "Faster responses than comparable services at the same cost.",
    ),
    (
        &["monitoring", "logging", "health"],
        "Operational transparency that shortens incident resolution.",
    ),
    (
        &["timeout", "retry", "rate limit"],
        "Resilience under partial outages that competitors do not offer.",
    ),
];
const DEFAULT_COMPETITIVE_ADVANTAGE: &str = "Cleaner codebase enables faster feature delivery.";

const CAPABILITY_GAP: TextTable = &[
    (&["eval", "exec"], "No sandboxing for dynamically evaluated code."),
    (&["injection", "shell"], "Shell commands are built from untrusted input."),
    (&["deserializ"], "Untrusted payloads are deserialized without validation."),
    (&["credential", "secret"], "Secrets are stored in source instead of a secret store."),
    (&["sleep"], "Waiting blocks worker threads instead of yielding."),
    (&["select"], "Queries fetch unbounded result sets."),
    (&["timeout"], "Outbound calls can hang indefinitely."),
    (&["cach"], "Repeated lookups are recomputed on every request."),
    (&["monitoring", "metric", "health"], "No visibility into runtime health."),
    (&["logging"], "Logs cannot be correlated across requests."),
    (&["rate limit"], "No protection against request floods."),
    (&["retry"], "Transient failures surface directly to users."),
    (&["validation", "input"], "Entry points accept unchecked input."),
];
const DEFAULT_CAPABILITY_GAP: &str = "Code hygiene falls short of project standards.";

const MARKET_IMPACT: TextTable = &[
    (
        &["unsafe", "injection", "credential", "secret", "security"],
        "Removes a blocker for regulated-industry customers.",
    ),
    (
        &["performance", "cach", "sleep", "latency", "select"],
        "Supports higher traffic tiers without new hardware.",
    ),
    (
        &["monitoring", "logging", "health"],
        "Enables credible uptime commitments in service agreements.",
    ),
];
const DEFAULT_MARKET_IMPACT: &str = "Incremental improvement in perceived product quality.";

const USER_BENEFIT: TextTable = &[
    (
        &["unsafe", "injection", "credential", "secret", "security", "validation"],
        "User data stays protected against tampering and disclosure.",
    ),
    (
        &["performance", "cach", "sleep", "latency", "select"],
        "Pages and API calls respond noticeably faster.",
    ),
    (
        &["timeout", "retry", "rate limit"],
        "Fewer failed requests when dependencies misbehave.",
    ),
    (
        &["monitoring", "logging", "health"],
        "Problems are fixed before users report them.",
    ),
];
const DEFAULT_USER_BENEFIT: &str = "More reliable behavior in everyday use.";

const TECHNICAL_REQUIREMENTS: ListTable = &[
    (
        &["eval", "exec"],
        &[
            "Replace dynamic evaluation with an explicit dispatch table",
            "Reject input that does not match the allowed grammar",
            "Log every rejected evaluation attempt",
        ],
    ),
    (
        &["injection", "shell"],
        &[
            "Pass arguments as a vector, never through a shell",
            "Validate command arguments against an allow-list",
        ],
    ),
    (
        &["deserializ"],
        &[
            "Use a safe loader for untrusted payloads",
            "Validate decoded structures against a schema",
        ],
    ),
    (
        &["credential", "secret"],
        &[
            "Load secrets from the environment or a secret store",
            "Fail fast when a required secret is missing",
        ],
    ),
    (
        &["sleep"],
        &[
            "Replace blocking sleeps with non-blocking timers",
            "Bound every wait with a deadline",
        ],
    ),
    (
        &["timeout", "retry"],
        &[
            "Apply a default timeout to every outbound call",
            "Retry idempotent calls with exponential backoff",
        ],
    ),
    (
        &["cach"],
        &[
            "Add a bounded cache with time-based expiry",
            "Expose hit and miss counters",
        ],
    ),
    (
        &["monitoring", "metric", "health", "logging"],
        &[
            "Emit structured events for every request",
            "Expose counters and latency histograms",
        ],
    ),
];
const DEFAULT_TECHNICAL_REQUIREMENTS: &[&str] = &[
    "Keep behavior backward compatible",
    "Cover the change with unit tests",
];

const SUCCESS_METRICS: ListTable = &[
    (
        &["unsafe", "injection", "credential", "secret", "security", "deserializ"],
        &[
            "Zero findings of this class in the next scan",
            "No regression in the security test suite",
        ],
    ),
    (
        &["performance", "cach", "sleep", "latency", "select"],
        &["p95 latency reduced by at least 10%", "Throughput not reduced"],
    ),
    (
        &["monitoring", "logging", "health"],
        &[
            "Mean time to detect incidents under 5 minutes",
            "Every request carries a correlation id",
        ],
    ),
];
const DEFAULT_SUCCESS_METRICS: &[&str] = &["All tests pass", "No new findings introduced"];

const RISK_FACTORS: ListTable = &[
    (
        &["eval", "exec", "injection", "shell"],
        &[
            "Callers may depend on the dynamic behavior being removed",
            "Allow-list may reject legitimate input",
        ],
    ),
    (
        &["cach"],
        &["Stale data served after updates", "Memory growth under high key cardinality"],
    ),
    (
        &["timeout", "retry", "rate limit"],
        &["Aggressive limits may reject legitimate traffic"],
    ),
];
const DEFAULT_RISK_FACTORS: &[&str] = &["Regression in untested code paths"];

const DEPENDENCIES: ListTable = &[
    (&["monitoring", "metric", "health"], &["metrics exporter", "alerting pipeline"]),
    (&["logging"], &["log aggregation"]),
    (&["cach"], &["cache backend"]),
    (&["credential", "secret"], &["secret store"]),
];
const DEFAULT_DEPENDENCIES: &[&str] = &["existing test suite"];

fn lookup<T: Copy>(table: &[(&[&str], T)], default: T, haystack: &str) -> T {
    table
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Priority from the description keywords.
pub fn priority_level(description: &str) -> PriorityLevel {
    let d = description.to_lowercase();
    if SECURITY_WORDS.iter().any(|k| d.contains(k)) {
        PriorityLevel::Critical
    } else if PERFORMANCE_WORDS.iter().any(|k| d.contains(k)) {
        PriorityLevel::High
    } else {
        PriorityLevel::Medium
    }
}

/// Effort from the description length in characters.
pub fn estimated_effort(description: &str) -> Effort {
    match description.chars().count() {
        n if n < 50 => Effort::Small,
        n if n < 100 => Effort::Medium,
        _ => Effort::Large,
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Stateless scope construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeBuilder;

impl ScopeBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Build a scope stamped with the current time.
    pub fn build(&self, improvement: &Improvement) -> Scope {
        self.build_at(improvement, Utc::now())
    }

    /// Build a scope with an explicit timestamp. Pure.
    pub fn build_at(&self, improvement: &Improvement, created_at: DateTime<Utc>) -> Scope {
        let d = improvement.description.to_lowercase();
        Scope {
            improvement_id: improvement.id.clone(),
            description: improvement.description.clone(),
            kind: improvement.kind,
            target: improvement.target.clone(),
            business_justification: lookup(
                BUSINESS_JUSTIFICATION,
                DEFAULT_BUSINESS_JUSTIFICATION,
                &d,
            )
            .to_string(),
            competitive_advantage: lookup(
                COMPETITIVE_ADVANTAGE,
                DEFAULT_COMPETITIVE_ADVANTAGE,
                &d,
            )
            .to_string(),
            capability_gap: lookup(CAPABILITY_GAP, DEFAULT_CAPABILITY_GAP, &d).to_string(),
            technical_requirements: owned(lookup(
                TECHNICAL_REQUIREMENTS,
                DEFAULT_TECHNICAL_REQUIREMENTS,
                &d,
            )),
            success_metrics: owned(lookup(SUCCESS_METRICS, DEFAULT_SUCCESS_METRICS, &d)),
            priority_level: priority_level(&improvement.description),
            estimated_effort: estimated_effort(&improvement.description),
            risk_factors: owned(lookup(RISK_FACTORS, DEFAULT_RISK_FACTORS, &d)),
            dependencies: owned(lookup(DEPENDENCIES, DEFAULT_DEPENDENCIES, &d)),
            market_impact: lookup(MARKET_IMPACT, DEFAULT_MARKET_IMPACT, &d).to_string(),
            user_benefit: lookup(USER_BENEFIT, DEFAULT_USER_BENEFIT, &d).to_string(),
            created_at,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
