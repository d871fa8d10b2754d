//! # Code Analyzer
//!
//! Pattern-based scanning of a source tree for improvement opportunities.
//!
//! The analyzer is deliberately shallow: a fixed table of line-level regular
//! expressions, no parsing. Each rule maps to a [`FindingKind`] and a
//! [`Severity`]; see [`RULES`] for the full table.
//!
//! ## Ordering
//! Candidate files are collected first and sorted by path, then read one at a
//! time as the [`FindingIter`] is advanced. Within a file, findings come out in
//! line order and, for one line, in rule-table order. Two scans of an unchanged
//! tree therefore yield identical sequences.
//!
//! ## Skips
//! Files that cannot be read (permissions, non-UTF-8, vanished) are skipped and
//! counted in [`ScanStats::files_skipped`]. A skip is never an error.

use std::{
    collections::{BTreeMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors from constructing an analyzer.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// A rule pattern failed to compile.
    #[error("rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        /// Name of the offending rule.
        rule: &'static str,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
}

// ─── Finding ──────────────────────────────────────────────────────────────────

/// Category of a finding, in selection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Unsafe constructs, injection risks, leaked secrets.
    Security,
    /// Blocking calls and expensive queries.
    Performance,
    /// Missing resilience or structural capability.
    Architecture,
    /// Hygiene issues.
    Style,
}

impl FindingKind {
    /// Every kind, most urgent first.
    pub const ALL: [FindingKind; 4] = [
        FindingKind::Security,
        FindingKind::Performance,
        FindingKind::Architecture,
        FindingKind::Style,
    ];

    /// Short lowercase label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Architecture => "architecture",
            Self::Style => "style",
        }
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic.
    Low,
    /// Worth fixing.
    Medium,
    /// Should be fixed soon.
    High,
    /// Fix immediately.
    Critical,
}

/// One pattern match in the scanned tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// `<rule>:<relative path>:<line>`.
    pub id: String,
    /// Category.
    pub kind: FindingKind,
    /// Rule text followed by the file it was found in.
    pub description: String,
    /// Path relative to the scan root, `/`-separated.
    pub file_path: String,
    /// Severity from the rule table.
    pub severity: Severity,
    /// 1-based line number.
    pub line: usize,
    /// Name of the rule that matched.
    pub rule: String,
}

// ─── Rule table ───────────────────────────────────────────────────────────────

/// Static description of one scanning rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    /// Stable rule name.
    pub name: &'static str,
    /// Finding category.
    pub kind: FindingKind,
    /// Finding severity.
    pub severity: Severity,
    /// Line pattern that triggers the rule.
    pub pattern: &'static str,
    /// If set, a line matching this pattern suppresses the rule.
    pub unless: Option<&'static str>,
    /// Description prefix for findings.
    pub text: &'static str,
}

/// The rule table, in evaluation order.
pub const RULES: &[RuleSpec] = &[
    RuleSpec {
        name: "dynamic-eval",
        kind: FindingKind::Security,
        severity: Severity::Critical,
        pattern: r"\beval\(",
        unless: None,
        text: "Unsafe dynamic code execution via eval()",
    },
    RuleSpec {
        name: "dynamic-exec",
        kind: FindingKind::Security,
        severity: Severity::Critical,
        pattern: r"\bexec\(",
        unless: None,
        text: "Unsafe dynamic code execution via exec()",
    },
    RuleSpec {
        name: "shell-injection",
        kind: FindingKind::Security,
        severity: Severity::High,
        pattern: r"shell\s*=\s*True|\bos\.system\(",
        unless: None,
        text: "Shell command injection risk from shell invocation",
    },
    RuleSpec {
        name: "unsafe-deserialize",
        kind: FindingKind::Security,
        severity: Severity::High,
        pattern: r"\bpickle\.loads?\(|\byaml\.load\(",
        unless: None,
        text: "Unsafe deserialization of untrusted data",
    },
    RuleSpec {
        name: "hardcoded-secret",
        kind: FindingKind::Security,
        severity: Severity::High,
        pattern: r#"(?i)(password|secret|api_key|token)\s*=\s*["'][^"']+["']"#,
        unless: None,
        text: "Hardcoded credential in source",
    },
    RuleSpec {
        name: "blocking-sleep",
        kind: FindingKind::Performance,
        severity: Severity::Medium,
        pattern: r"\btime\.sleep\(|\bthread::sleep\(",
        unless: None,
        text: "Blocking sleep call stalls the calling thread",
    },
    RuleSpec {
        name: "select-star",
        kind: FindingKind::Performance,
        severity: Severity::Low,
        pattern: r"(?i)\bSELECT\s+\*",
        unless: None,
        text: "Unbounded SELECT * query",
    },
    RuleSpec {
        name: "missing-timeout",
        kind: FindingKind::Architecture,
        severity: Severity::Medium,
        pattern: r"\brequests\.(get|post|put|delete)\(|\burlopen\(",
        unless: Some(r"\btimeout\b"),
        text: "Outbound network call without timeout",
    },
    RuleSpec {
        name: "bare-except",
        kind: FindingKind::Style,
        severity: Severity::Low,
        pattern: r"^\s*except\s*:\s*$",
        unless: None,
        text: "Bare except clause swallows errors",
    },
    RuleSpec {
        name: "debug-print",
        kind: FindingKind::Style,
        severity: Severity::Low,
        pattern: r"^\s*(print\(|println!\(|dbg!\()",
        unless: None,
        text: "Debug print statement left in code",
    },
];

struct CompiledRule {
    spec: RuleSpec,
    pattern: Regex,
    unless: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line) && !self.unless.as_ref().is_some_and(|u| u.is_match(line))
    }
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// Which files the analyzer looks at.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// File extensions to scan (without the dot).
    pub extensions: Vec<String>,
    /// Directory names that are never descended into.
    pub ignore_dirs: Vec<String>,
    /// Files larger than this are skipped.
    pub max_file_bytes: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            extensions: ["py", "rs", "js", "ts", "go", "java", "rb", "sh"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_dirs: [".git", "target", "node_modules", "__pycache__", ".venv", "venv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_bytes: 1024 * 1024,
        }
    }
}

// ─── Scan statistics ──────────────────────────────────────────────────────────

/// Counters accumulated while a [`FindingIter`] is consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Files successfully read.
    pub files_scanned: usize,
    /// Files skipped because they could not be read.
    pub files_skipped: usize,
    /// Findings yielded so far.
    pub findings: usize,
    /// Findings per kind label.
    pub by_kind: BTreeMap<String, usize>,
}

// ─── Analyzer ─────────────────────────────────────────────────────────────────

/// Line-pattern scanner over a source tree.
#[derive(Clone)]
pub struct CodeAnalyzer {
    cfg: Arc<AnalyzerConfig>,
    rules: Arc<Vec<CompiledRule>>,
}

impl CodeAnalyzer {
    /// Build an analyzer with the built-in rule table.
    ///
    /// # Errors
    /// Returns [`AnalyzerError::InvalidPattern`] if a rule fails to compile.
    pub fn new(cfg: AnalyzerConfig) -> Result<Self, AnalyzerError> {
        let mut rules = Vec::with_capacity(RULES.len());
        for spec in RULES {
            let pattern = Regex::new(spec.pattern).map_err(|source| AnalyzerError::InvalidPattern {
                rule: spec.name,
                source,
            })?;
            let unless = spec
                .unless
                .map(Regex::new)
                .transpose()
                .map_err(|source| AnalyzerError::InvalidPattern {
                    rule: spec.name,
                    source,
                })?;
            rules.push(CompiledRule {
                spec: *spec,
                pattern,
                unless,
            });
        }
        Ok(Self {
            cfg: Arc::new(cfg),
            rules: Arc::new(rules),
        })
    }

    /// Start a scan of `root`.
    ///
    /// File discovery happens here; file contents are read lazily as the
    /// returned iterator advances. Call again to restart.
    pub fn scan(&self, root: impl AsRef<Path>) -> FindingIter {
        let root = root.as_ref().to_path_buf();
        let mut skipped = 0usize;
        let mut files = Vec::new();

        let ignore = self.cfg.ignore_dirs.clone();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !ignore.iter().any(|d| e.file_name().to_string_lossy() == d.as_str())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(err = %e, "walk error, skipping entry");
                    skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if !self.cfg.extensions.iter().any(|e| e == ext) {
                continue;
            }
            match entry.metadata() {
                Ok(m) if m.len() > self.cfg.max_file_bytes => {
                    debug!(path = %entry.path().display(), bytes = m.len(), "file too large, skipping");
                    skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %entry.path().display(), err = %e, "metadata unavailable, skipping");
                    skipped += 1;
                    continue;
                }
            }
            files.push(entry.into_path());
        }
        files.sort();

        FindingIter {
            root,
            files: files.into(),
            rules: Arc::clone(&self.rules),
            pending: VecDeque::new(),
            stats: ScanStats {
                files_skipped: skipped,
                ..ScanStats::default()
            },
        }
    }

    /// Convenience: scan and collect every finding.
    pub fn scan_all(&self, root: impl AsRef<Path>) -> (Vec<Finding>, ScanStats) {
        let mut iter = self.scan(root);
        let findings: Vec<Finding> = iter.by_ref().collect();
        (findings, iter.stats().clone())
    }
}

// ─── Iterator ─────────────────────────────────────────────────────────────────

/// Lazy, finite sequence of findings for one scan.
pub struct FindingIter {
    root: PathBuf,
    files: VecDeque<PathBuf>,
    rules: Arc<Vec<CompiledRule>>,
    pending: VecDeque<Finding>,
    stats: ScanStats,
}

impl FindingIter {
    /// Counters so far. Complete once the iterator is exhausted.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    fn scan_file(&mut self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %path.display(), err = %e, "unreadable file skipped");
                self.stats.files_skipped += 1;
                return;
            }
        };
        self.stats.files_scanned += 1;

        let rel = relative_path(&self.root, path);
        for (idx, line) in content.lines().enumerate() {
            if is_comment(line) {
                continue;
            }
            for rule in self.rules.iter() {
                if !rule.matches(line) {
                    continue;
                }
                let line_no = idx + 1;
                self.pending.push_back(Finding {
                    id: format!("{}:{}:{}", rule.spec.name, rel, line_no),
                    kind: rule.spec.kind,
                    description: format!("{} in {}", rule.spec.text, rel),
                    file_path: rel.clone(),
                    severity: rule.spec.severity,
                    line: line_no,
                    rule: rule.spec.name.to_string(),
                });
            }
        }
    }
}

impl Iterator for FindingIter {
    type Item = Finding;

    fn next(&mut self) -> Option<Finding> {
        loop {
            if let Some(f) = self.pending.pop_front() {
                self.stats.findings += 1;
                *self
                    .stats
                    .by_kind
                    .entry(f.kind.label().to_string())
                    .or_insert(0) += 1;
                return Some(f);
            }
            let path = self.files.pop_front()?;
            self.scan_file(&path);
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_comment(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#') || t.starts_with("//")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn analyzer() -> CodeAnalyzer {
        CodeAnalyzer::new(AnalyzerConfig::default()).unwrap()
    }

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_eval_yields_security_finding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.py", "x = eval(user_input)\n");
        let (findings, stats) = analyzer().scan_all(dir.path());
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.kind, FindingKind::Security);
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.file_path, "app.py");
        assert_eq!(f.line, 1);
        assert_eq!(f.id, "dynamic-eval:app.py:1");
        assert!(f.description.ends_with("in app.py"));
        assert_eq!(stats.files_scanned, 1);
    }

    #[test]
    fn test_secret_with_prefixed_name_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "settings.py",
            "DB_PASSWORD = \"hunter2\"\ngithub_token = 'abc'\npassword = \"x\"\nAWS_SECRET=\"k\"\ntoken_count = 3\n",
        );
        let lines: Vec<usize> = analyzer()
            .scan_all(dir.path())
            .0
            .iter()
            .filter(|f| f.rule == "hardcoded-secret")
            .map(|f| f.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_eval_inside_identifier_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "r.py", "docs = retrieval(query)\n");
        assert!(analyzer().scan_all(dir.path()).0.is_empty());
    }

    #[test]
    fn test_commented_lines_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "c.py", "# eval(x) is dangerous\n// time.sleep(1)\n");
        assert!(analyzer().scan_all(dir.path()).0.is_empty());
    }

    #[test]
    fn test_missing_timeout_suppressed_when_timeout_present() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "net.py",
            "a = requests.get(url)\nb = requests.get(url, timeout=5)\n",
        );
        let (findings, _) = analyzer().scan_all(dir.path());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "missing-timeout");
        assert_eq!(findings[0].kind, FindingKind::Architecture);
        assert_eq!(findings[0].line, 1);
    }

    #[test]
    fn test_order_is_path_then_line() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.py", "time.sleep(1)\n");
        write(dir.path(), "a.py", "print(1)\nx = eval(y)\n");
        write(dir.path(), "a/z.py", "exec(code)\n");
        let (findings, _) = analyzer().scan_all(dir.path());
        let ids: Vec<_> = findings.iter().map(|f| f.id.as_str()).collect();
        // Paths compare component-wise, so `a/z.py` sorts before `a.py`.
        assert_eq!(
            ids,
            vec![
                "dynamic-exec:a/z.py:1",
                "debug-print:a.py:1",
                "dynamic-eval:a.py:2",
                "blocking-sleep:b.py:1",
            ]
        );
    }

    #[test]
    fn test_scan_is_restartable_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "m.py", "time.sleep(1)\nx = eval(y)\nexcept:\n");
        let a = analyzer();
        let first: Vec<_> = a.scan(dir.path()).collect();
        let second: Vec<_> = a.scan(dir.path()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_ignored_dirs_and_extensions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "target/gen.rs", "eval(x)\n");
        write(dir.path(), "notes.txt", "eval(x)\n");
        write(dir.path(), "src/lib.rs", "std::thread::sleep(d);\n");
        let (findings, _) = analyzer().scan_all(dir.path());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file_path, "src/lib.rs");
        assert_eq!(findings[0].kind, FindingKind::Performance);
    }

    #[test]
    fn test_unreadable_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bin.py"), [0xff, 0xfe, 0x00, 0x9f]).unwrap();
        write(dir.path(), "ok.py", "x = eval(y)\n");
        let (findings, stats) = analyzer().scan_all(dir.path());
        assert_eq!(findings.len(), 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_scanned, 1);
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", &"x = eval(y)\n".repeat(10));
        let a = CodeAnalyzer::new(AnalyzerConfig {
            max_file_bytes: 16,
            ..AnalyzerConfig::default()
        })
        .unwrap();
        let (findings, stats) = a.scan_all(dir.path());
        assert!(findings.is_empty());
        assert_eq!(stats.files_skipped, 1);
    }

    #[test]
    fn test_stats_count_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "s.py", "password = \"hunter2\"\nexcept:\nprint(x)\n");
        let (_, stats) = analyzer().scan_all(dir.path());
        assert_eq!(stats.findings, 3);
        assert_eq!(stats.by_kind.get("security"), Some(&1));
        assert_eq!(stats.by_kind.get("style"), Some(&2));
    }

    #[test]
    fn test_rule_names_unique() {
        let mut names: Vec<_> = RULES.iter().map(|r| r.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RULES.len());
    }
}
