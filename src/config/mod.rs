//! # Engine Configuration
//!
//! ## Responsibility
//! Parse and validate TOML engine configuration. Every section and field has a
//! default, so an empty file is a valid configuration:
//! ```text
//! evolve --config evolution.toml cycle
//! ```
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `EngineConfig`
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//! - Environment overrides are applied from an explicit map, never read here
//!
//! ## NOT Responsible For
//! - Building the engine from config (that belongs to `evolve::engine`)
//! - Reading environment variables (that belongs to the binary)

pub mod loader;
pub mod validation;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::evolve::analyzer::AnalyzerConfig;
use crate::evolve::guard::{GuardConfig, DEFAULT_MIN_CONTENT_LEN};
use validation::ConfigError;

/// Override key for [`PublisherSection::target_repository`].
pub const ENV_TARGET_REPO: &str = "EVOLUTION_TARGET_REPO";
/// Override key for [`SchedulerSection::enabled`].
pub const ENV_SCHEDULER_ENABLED: &str = "EVOLUTION_SCHEDULER_ENABLED";
/// Override key for [`SchedulerSection::interval_secs`].
pub const ENV_INTERVAL_SECS: &str = "EVOLUTION_INTERVAL_SECS";

/// Every override key [`EngineConfig::apply_overrides`] understands.
pub const OVERRIDE_KEYS: &[&str] = &[ENV_TARGET_REPO, ENV_SCHEDULER_ENABLED, ENV_INTERVAL_SECS];

// ── Default value functions ──────────────────────────────────────────────

fn default_name() -> String {
    "evolution-engine".to_string()
}

fn default_log_capacity() -> usize {
    1000
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_extensions() -> Vec<String> {
    AnalyzerConfig::default().extensions
}

fn default_ignore_dirs() -> Vec<String> {
    AnalyzerConfig::default().ignore_dirs
}

fn default_max_file_bytes() -> u64 {
    AnalyzerConfig::default().max_file_bytes
}

fn default_min_content_len() -> usize {
    DEFAULT_MIN_CONTENT_LEN
}

/// Default scheduler interval: one hour.
fn default_interval_secs() -> u64 {
    3600
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_publish_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an engine instance.
///
/// # Example
///
/// ```toml
/// [engine]
/// name = "nightly"
/// state_dir = ".evolution"
///
/// [analyzer]
/// root = "src"
///
/// [scheduler]
/// enabled = true
/// interval_secs = 900
///
/// [publisher]
/// mode = "git"
/// repo_path = "."
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity and state locations.
    pub engine: EngineSection,
    /// Source scanning.
    pub analyzer: AnalyzerSection,
    /// Improvement selection.
    pub selector: SelectorSection,
    /// Spam and duplicate protection.
    pub guard: GuardSection,
    /// Periodic cycles.
    pub scheduler: SchedulerSection,
    /// Where artifacts go.
    pub publisher: PublisherSection,
}

/// Engine identity and state locations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EngineSection {
    /// Human-readable engine name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Directory for durable stores and the JSONL log. In-memory when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Directory receiving a JSON and a Markdown report per cycle.
    #[serde(default)]
    pub reports_dir: Option<PathBuf>,
    /// Records kept by the in-memory log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            state_dir: None,
            reports_dir: None,
            log_capacity: default_log_capacity(),
        }
    }
}

/// Source scanning settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnalyzerSection {
    /// Root of the tree to scan.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// File extensions to scan, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for AnalyzerSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            extensions: default_extensions(),
            ignore_dirs: default_ignore_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl AnalyzerSection {
    /// Analyzer settings for this section.
    pub fn to_analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            extensions: self.extensions.clone(),
            ignore_dirs: self.ignore_dirs.clone(),
            max_file_bytes: self.max_file_bytes,
        }
    }
}

/// Improvement selection settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SelectorSection {
    /// Offer generic template improvements once findings are exhausted.
    #[serde(default = "default_true")]
    pub use_fallback: bool,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self { use_fallback: true }
    }
}

/// Content guard settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GuardSection {
    /// Minimum normalized artifact length.
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
    /// Banned name patterns added to the built-in list.
    #[serde(default)]
    pub extra_banned_patterns: Vec<String>,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            min_content_len: default_min_content_len(),
            extra_banned_patterns: Vec::new(),
        }
    }
}

impl GuardSection {
    /// Guard settings for this section.
    pub fn to_guard_config(&self) -> GuardConfig {
        GuardConfig {
            min_content_len: self.min_content_len,
            extra_banned_patterns: self.extra_banned_patterns.clone(),
        }
    }
}

/// Periodic cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SchedulerSection {
    /// Run cycles on a timer.
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Stop the scheduler once nothing is left to do.
    #[serde(default = "default_true")]
    pub stop_when_complete: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            stop_when_complete: true,
        }
    }
}

impl SchedulerSection {
    /// Interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// How artifacts are published.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublisherMode {
    /// Record commits in memory only.
    #[default]
    DryRun,
    /// Commit into a git working copy.
    Git,
}

/// Publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct PublisherSection {
    /// Publisher implementation.
    #[serde(default)]
    pub mode: PublisherMode,
    /// Repository identifier (e.g. `owner/name`), used in commit messages.
    #[serde(default)]
    pub target_repository: String,
    /// Working copy the git publisher writes into.
    #[serde(default = "default_root")]
    pub repo_path: PathBuf,
    /// Remote to push to.
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Branch to push.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Push after committing.
    #[serde(default)]
    pub push: bool,
    /// Upper bound for one publish, in seconds.
    #[serde(default = "default_publish_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            mode: PublisherMode::default(),
            target_repository: String::new(),
            repo_path: default_root(),
            remote: default_remote(),
            branch: default_branch(),
            push: false,
            timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl PublisherSection {
    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Overrides ────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Apply overrides from a key/value map (normally built from the process
    /// environment by the caller). Unknown keys are ignored.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidField`] when a value cannot be parsed; the
    /// config is left unchanged in that case.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), ConfigError> {
        let mut next = self.clone();

        if let Some(repo) = vars.get(ENV_TARGET_REPO) {
            next.publisher.target_repository = repo.trim().to_string();
        }
        if let Some(raw) = vars.get(ENV_SCHEDULER_ENABLED) {
            next.scheduler.enabled = parse_bool(raw).ok_or_else(|| ConfigError::InvalidField {
                field: ENV_SCHEDULER_ENABLED.into(),
                value: raw.clone(),
                reason: "expected true/false/1/0/yes/no".into(),
            })?;
        }
        if let Some(raw) = vars.get(ENV_INTERVAL_SECS) {
            next.scheduler.interval_secs =
                raw.trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidField {
                        field: ENV_INTERVAL_SECS.into(),
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
        }

        *self = next;
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Export the JSON Schema for [`EngineConfig`].
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
pub fn json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(EngineConfig);
    serde_json::to_string_pretty(&schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.engine.name, "evolution-engine");
        assert!(cfg.selector.use_fallback);
        assert!(!cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.interval_secs, 3600);
        assert_eq!(cfg.publisher.mode, PublisherMode::DryRun);
        assert_eq!(cfg.guard.min_content_len, 100);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: EngineConfig = toml::from_str("[scheduler]\nenabled = true\n").unwrap();
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.interval_secs, 3600);
        assert!(cfg.scheduler.stop_when_complete);
    }

    #[test]
    fn test_publisher_mode_snake_case() {
        let cfg: EngineConfig = toml::from_str("[publisher]\nmode = \"git\"\n").unwrap();
        assert_eq!(cfg.publisher.mode, PublisherMode::Git);
        assert!(toml::from_str::<EngineConfig>("[publisher]\nmode = \"svn\"\n").is_err());
    }

    #[test]
    fn test_apply_overrides_sets_all_three() {
        let mut cfg = EngineConfig::default();
        cfg.apply_overrides(&vars(&[
            (ENV_TARGET_REPO, "acme/service"),
            (ENV_SCHEDULER_ENABLED, "yes"),
            (ENV_INTERVAL_SECS, "120"),
        ]))
        .unwrap();
        assert_eq!(cfg.publisher.target_repository, "acme/service");
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.interval(), Duration::from_secs(120));
    }

    #[test]
    fn test_apply_overrides_bad_value_leaves_config_unchanged() {
        let mut cfg = EngineConfig::default();
        let err = cfg
            .apply_overrides(&vars(&[
                (ENV_TARGET_REPO, "acme/service"),
                (ENV_INTERVAL_SECS, "soon"),
            ]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_apply_overrides_ignores_unknown_keys() {
        let mut cfg = EngineConfig::default();
        cfg.apply_overrides(&vars(&[("PATH", "/bin")])).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_json_schema_is_valid_json() {
        let schema = json_schema().unwrap();
        let v: serde_json::Value = serde_json::from_str(&schema).unwrap();
        assert!(v["properties"]["scheduler"].is_object() || v["definitions"].is_object());
    }

    #[test]
    fn test_section_conversions() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.analyzer.to_analyzer_config().max_file_bytes, 1024 * 1024);
        assert_eq!(cfg.guard.to_guard_config().min_content_len, 100);
    }
}
