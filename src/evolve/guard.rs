//! # Content Guard
//!
//! ## Responsibility
//! Stop the engine from emitting duplicate or spam-like artifacts. An artifact
//! passes only if its file name avoids every banned pattern, its normalized
//! content is long enough, and that normalized content has never been admitted
//! before.
//!
//! ## Guarantees
//! - The seen-hash set only grows; a hash once admitted is rejected forever
//! - A rejected artifact never mutates the seen-hash set
//! - [`ContentGuard::admit`] is an atomic check-and-insert
//!
//! ## Two-step admission
//! [`ContentGuard::screen`] runs every check without recording anything and
//! returns an [`Admission`]. [`ContentGuard::record`] commits it. The engine
//! screens during a cycle and records only once the artifacts are published,
//! so an abandoned cycle leaves the set untouched.

use std::sync::{Arc, OnceLock};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::store::{IdStore, StoreError};

/// Banned artifact name patterns, matched case-insensitively against the
/// basename.
pub const BANNED_PATTERNS: &[&str] = &[
    "*_security_*",
    "*_improvement_*",
    "*_enhancement_*",
    "*_optimization_*",
    "*_duplicate*",
    "*_copy.*",
    "*_[0-9][0-9][0-9][0-9][0-9][0-9][0-9][0-9]_[0-9][0-9][0-9][0-9][0-9][0-9].*",
];

/// Default minimum normalized content length.
pub const DEFAULT_MIN_CONTENT_LEN: usize = 100;

const COMMENT_PREFIXES: &[&str] = &["#", "//", "/*", "*", "--", "\"\"\"", "'''"];

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Construction errors.
#[derive(Debug, Error)]
pub enum GuardError {
    /// A banned pattern is not a valid glob.
    #[error("invalid banned pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as configured.
        pattern: String,
        /// Parser message.
        reason: String,
    },
}

/// Why an artifact was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SpamRejected {
    /// The name is empty.
    #[error("artifact name is empty")]
    EmptyName,

    /// The name matches a banned pattern.
    #[error("artifact name '{name}' matches banned pattern '{pattern}'")]
    BannedFilename {
        /// Offending name.
        name: String,
        /// First pattern that matched.
        pattern: String,
    },

    /// Normalized content is below the length floor.
    #[error("artifact '{name}' too short: {len} < {min} chars after normalization")]
    TooShort {
        /// Artifact name.
        name: String,
        /// Normalized length.
        len: usize,
        /// Configured floor.
        min: usize,
    },

    /// Normalized content was admitted before (or earlier in the same batch).
    #[error("artifact '{name}' duplicates existing content {hash}")]
    Duplicate {
        /// Artifact name.
        name: String,
        /// SHA-256 of the normalized content.
        hash: String,
    },
}

// ─── Pure functions ───────────────────────────────────────────────────────────

fn timestamp_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\d{8}_\d{6}|\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
        )
        .ok()
    })
    .as_ref()
}

/// Strip comment lines, `Generated …` lines and timestamps, then trim.
///
/// Two artifacts that differ only in those respects normalize identically.
pub fn normalize(content: &str) -> String {
    let kept = content
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !COMMENT_PREFIXES.iter().any(|p| t.starts_with(p)) && !t.starts_with("Generated")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let stripped = match timestamp_re() {
        Some(re) => re.replace_all(&kept, "").into_owned(),
        None => kept,
    };
    stripped.trim().to_string()
}

/// Hex SHA-256 of [`normalize`]d content.
pub fn content_hash(content: &str) -> String {
    hash_normalized(&normalize(content))
}

fn hash_normalized(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─── Configuration & stats ────────────────────────────────────────────────────

/// Guard tuning.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Minimum normalized length.
    pub min_content_len: usize,
    /// Patterns added on top of [`BANNED_PATTERNS`].
    pub extra_banned_patterns: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_content_len: DEFAULT_MIN_CONTENT_LEN,
            extra_banned_patterns: Vec::new(),
        }
    }
}

/// Admission counters since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    /// Hashes recorded.
    pub admitted: u64,
    /// Rejected for their name.
    pub rejected_filename: u64,
    /// Rejected for length.
    pub rejected_short: u64,
    /// Rejected as duplicates.
    pub rejected_duplicate: u64,
}

/// A screened artifact, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// Artifact name.
    pub name: String,
    /// Hash that will be recorded.
    pub hash: String,
    /// Normalized length.
    pub normalized_len: usize,
}

// ─── Guard ────────────────────────────────────────────────────────────────────

/// Filename and content-hash gate for generated artifacts.
pub struct ContentGuard {
    banned: GlobSet,
    patterns: Vec<String>,
    min_content_len: usize,
    seen: Arc<dyn IdStore>,
    stats: Mutex<GuardStats>,
}

impl ContentGuard {
    /// Build a guard over the given seen-hash store.
    ///
    /// # Errors
    /// Returns [`GuardError::InvalidPattern`] if an extra pattern is not a glob.
    pub fn new(cfg: GuardConfig, seen: Arc<dyn IdStore>) -> Result<Self, GuardError> {
        let patterns: Vec<String> = BANNED_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(cfg.extra_banned_patterns)
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| GuardError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            builder.add(glob);
        }
        let banned = builder.build().map_err(|e| GuardError::InvalidPattern {
            pattern: "<set>".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            banned,
            patterns,
            min_content_len: cfg.min_content_len,
            seen,
            stats: Mutex::new(GuardStats::default()),
        })
    }

    /// Return `true` if `name` is acceptable as an artifact name.
    pub fn validate_filename(&self, name: &str) -> bool {
        !basename(name).is_empty() && self.banned_pattern(name).is_none()
    }

    /// The first banned pattern `name` matches, if any.
    pub fn banned_pattern(&self, name: &str) -> Option<&str> {
        self.banned
            .matches(basename(name))
            .into_iter()
            .min()
            .and_then(|i| self.patterns.get(i))
            .map(String::as_str)
    }

    /// Run every check without recording anything.
    pub fn screen(&self, name: &str, content: &str) -> Result<Admission, SpamRejected> {
        let result = self.check(name, content);
        if let Err(reason) = &result {
            self.count_rejection(reason);
        }
        result
    }

    /// Screen a batch; later entries whose content duplicates an earlier
    /// admitted entry in the same batch are rejected too.
    pub fn screen_batch<'a, I>(&self, items: I) -> Vec<Result<Admission, SpamRejected>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut batch_hashes: Vec<String> = Vec::new();
        items
            .into_iter()
            .map(|(name, content)| {
                let result = self.check(name, content).and_then(|adm| {
                    if batch_hashes.contains(&adm.hash) {
                        Err(SpamRejected::Duplicate {
                            name: name.to_string(),
                            hash: adm.hash,
                        })
                    } else {
                        batch_hashes.push(adm.hash.clone());
                        Ok(adm)
                    }
                });
                if let Err(reason) = &result {
                    self.count_rejection(reason);
                }
                result
            })
            .collect()
    }

    /// Commit a screened artifact. Returns `Ok(false)` if the hash was already
    /// present (another admission won).
    ///
    /// # Errors
    /// Propagates store I/O failures.
    pub fn record(&self, admission: &Admission) -> Result<bool, StoreError> {
        let added = self.seen.add(&admission.hash)?;
        if added {
            self.stats.lock().admitted += 1;
            debug!(name = %admission.name, hash = %admission.hash, "artifact hash recorded");
        }
        Ok(added)
    }

    /// Check and record in one step.
    ///
    /// Returns `true` iff the name is valid, the normalized content is long
    /// enough and its hash was not seen before; the hash is then recorded.
    pub fn admit(&self, name: &str, content: &str) -> bool {
        let admission = match self.screen(name, content) {
            Ok(a) => a,
            Err(reason) => {
                debug!(%reason, "artifact refused");
                return false;
            }
        };
        match self.record(&admission) {
            Ok(true) => true,
            Ok(false) => {
                self.stats.lock().rejected_duplicate += 1;
                false
            }
            Err(e) => {
                warn!(err = %e, name, "hash store write failed; artifact refused");
                false
            }
        }
    }

    /// Return `true` if this content has been admitted before.
    pub fn is_known(&self, content: &str) -> bool {
        self.seen.contains(&content_hash(content))
    }

    /// Number of admitted hashes.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Forget every admitted hash. Never called during normal operation.
    ///
    /// # Errors
    /// Propagates store I/O failures.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.seen.clear()?;
        *self.stats.lock() = GuardStats::default();
        Ok(())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> GuardStats {
        self.stats.lock().clone()
    }

    fn check(&self, name: &str, content: &str) -> Result<Admission, SpamRejected> {
        if basename(name).is_empty() {
            return Err(SpamRejected::EmptyName);
        }
        if let Some(pattern) = self.banned_pattern(name) {
            return Err(SpamRejected::BannedFilename {
                name: name.to_string(),
                pattern: pattern.to_string(),
            });
        }

        let normalized = normalize(content);
        let len = normalized.chars().count();
        if len < self.min_content_len {
            return Err(SpamRejected::TooShort {
                name: name.to_string(),
                len,
                min: self.min_content_len,
            });
        }

        let hash = hash_normalized(&normalized);
        if self.seen.contains(&hash) {
            return Err(SpamRejected::Duplicate {
                name: name.to_string(),
                hash,
            });
        }

        Ok(Admission {
            name: name.to_string(),
            hash,
            normalized_len: len,
        })
    }

    fn count_rejection(&self, reason: &SpamRejected) {
        let mut stats = self.stats.lock();
        match reason {
            SpamRejected::EmptyName | SpamRejected::BannedFilename { .. } => {
                stats.rejected_filename += 1
            }
            SpamRejected::TooShort { .. } => stats.rejected_short += 1,
            SpamRejected::Duplicate { .. } => stats.rejected_duplicate += 1,
        }
    }
}

fn basename(name: &str) -> &str {
    name.rsplit(&['/', '\\'][..]).next().unwrap_or(name)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
