//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`EngineConfig`], and run
//! validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Environment overrides (see [`EngineConfig::apply_overrides`])
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::{self, ConfigError};
use super::EngineConfig;

/// Load an [`EngineConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Example
///
/// ```rust,ignore
/// use evolution_engine::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("evolution.toml"))?;
/// println!("Loaded engine: {}", config.engine.name);
/// ```
pub fn load_from_file(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`EngineConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[engine]
name = "nightly"
state_dir = ".evolution/state"
reports_dir = ".evolution/reports"
log_capacity = 50

[analyzer]
root = "src"
extensions = ["py"]

[selector]
use_fallback = false

[guard]
min_content_len = 120
extra_banned_patterns = ["*_v2.*"]

[scheduler]
enabled = true
interval_secs = 900
stop_when_complete = false

[publisher]
mode = "dry_run"
target_repository = "acme/service"
timeout_secs = 30
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.engine.name, "nightly");
        assert_eq!(config.engine.log_capacity, 50);
        assert!(!config.selector.use_fallback);
        assert_eq!(config.guard.extra_banned_patterns, vec!["*_v2.*".to_string()]);
        assert_eq!(config.scheduler.interval_secs, 900);
        assert_eq!(config.publisher.target_repository, "acme/service");
    }

    #[test]
    fn test_load_from_str_empty_is_valid() {
        assert!(load_from_str("", "empty").is_ok());
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let err = load_from_str("not valid toml [[[", "bad.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_load_from_str_validation_failure() {
        let err = load_from_str("[scheduler]\ninterval_secs = 0\n", "zero.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("scheduler.interval_secs"));
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID_TOML.as_bytes()).unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.engine.name, "nightly");
    }

    #[test]
    fn test_load_from_file_missing_returns_io_error() {
        let err = load_from_file(Path::new("/nonexistent/evolution.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
