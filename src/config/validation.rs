//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`EngineConfig`] that cannot be
//! expressed through the type system alone (range checks, glob syntax,
//! cross-field invariants).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::{EngineConfig, PublisherMode};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "scheduler.interval_secs").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Validate all semantic constraints on an [`EngineConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns every violation found.
pub fn validate(config: &EngineConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Engine ───────────────────────────────────────────────────────
    if config.engine.name.trim().is_empty() {
        errors.push(invalid("engine.name", "", "must not be empty"));
    }
    if config.engine.log_capacity == 0 {
        errors.push(invalid("engine.log_capacity", 0, "must be at least 1"));
    }

    // ── Analyzer ─────────────────────────────────────────────────────
    if config.analyzer.extensions.is_empty() {
        errors.push(invalid(
            "analyzer.extensions",
            "[]",
            "at least one extension is required",
        ));
    }
    for ext in &config.analyzer.extensions {
        if ext.trim().is_empty() || ext.starts_with('.') {
            errors.push(invalid(
                "analyzer.extensions",
                ext,
                "extensions are non-empty and written without the dot",
            ));
        }
    }
    if config.analyzer.max_file_bytes == 0 {
        errors.push(invalid("analyzer.max_file_bytes", 0, "must be at least 1"));
    }

    // ── Guard ────────────────────────────────────────────────────────
    if config.guard.min_content_len == 0 {
        errors.push(invalid("guard.min_content_len", 0, "must be at least 1"));
    }
    for pattern in &config.guard.extra_banned_patterns {
        if let Err(e) = globset::Glob::new(pattern) {
            errors.push(invalid(
                "guard.extra_banned_patterns",
                pattern,
                &format!("not a valid glob: {e}"),
            ));
        }
    }

    // ── Scheduler ────────────────────────────────────────────────────
    if config.scheduler.interval_secs == 0 {
        errors.push(invalid(
            "scheduler.interval_secs",
            0,
            "must be at least 1 second",
        ));
    }

    // ── Publisher ────────────────────────────────────────────────────
    if config.publisher.timeout_secs == 0 {
        errors.push(invalid(
            "publisher.timeout_secs",
            0,
            "must be at least 1 second",
        ));
    }
    if config.publisher.mode == PublisherMode::Git && config.publisher.push {
        if config.publisher.remote.trim().is_empty() {
            errors.push(invalid(
                "publisher.remote",
                "",
                "required when push is enabled",
            ));
        }
        if config.publisher.branch.trim().is_empty() {
            errors.push(invalid(
                "publisher.branch",
                "",
                "required when push is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(e: &ConfigError) -> &str {
        match e {
            ConfigError::InvalidField { field, .. } => field,
            _ => "",
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.engine.name = "  ".into();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(field_of(&errs[0]), "engine.name");
    }

    #[test]
    fn test_zero_log_capacity_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.engine.log_capacity = 0;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(field_of(&errs[0]), "engine.log_capacity");
    }

    #[test]
    fn test_extensions_rules() {
        let mut cfg = EngineConfig::default();
        cfg.analyzer.extensions = vec![];
        assert_eq!(
            field_of(&validate(&cfg).unwrap_err()[0]),
            "analyzer.extensions"
        );
        cfg.analyzer.extensions = vec![".py".into()];
        assert_eq!(
            field_of(&validate(&cfg).unwrap_err()[0]),
            "analyzer.extensions"
        );
    }

    #[test]
    fn test_zero_max_file_bytes_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.analyzer.max_file_bytes = 0;
        assert_eq!(
            field_of(&validate(&cfg).unwrap_err()[0]),
            "analyzer.max_file_bytes"
        );
    }

    #[test]
    fn test_guard_rules() {
        let mut cfg = EngineConfig::default();
        cfg.guard.min_content_len = 0;
        cfg.guard.extra_banned_patterns = vec!["[unclosed".into()];
        let errs = validate(&cfg).unwrap_err();
        let fields: Vec<_> = errs.iter().map(field_of).collect();
        assert_eq!(
            fields,
            vec!["guard.min_content_len", "guard.extra_banned_patterns"]
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.scheduler.interval_secs = 0;
        assert_eq!(
            field_of(&validate(&cfg).unwrap_err()[0]),
            "scheduler.interval_secs"
        );
    }

    #[test]
    fn test_zero_publish_timeout_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.publisher.timeout_secs = 0;
        assert_eq!(
            field_of(&validate(&cfg).unwrap_err()[0]),
            "publisher.timeout_secs"
        );
    }

    #[test]
    fn test_git_push_requires_remote_and_branch() {
        let mut cfg = EngineConfig::default();
        cfg.publisher.mode = PublisherMode::Git;
        cfg.publisher.push = true;
        cfg.publisher.remote = String::new();
        cfg.publisher.branch = String::new();
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 2);
        // Not pushing: both may be empty.
        cfg.publisher.push = false;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut cfg = EngineConfig::default();
        cfg.engine.name = String::new();
        cfg.scheduler.interval_secs = 0;
        cfg.publisher.timeout_secs = 0;
        assert_eq!(validate(&cfg).unwrap_err().len(), 3);
    }
}
