//! Artifact synthesis for the implementing phase.
//!
//! Every scope yields exactly two artifacts: a module and its tests. Rust is
//! emitted when the scope targets a `.rs` file, Python otherwise. Text taken
//! from the scope is sanitized before it is embedded, so generated sources
//! never carry stray quotes or delimiters and never re-trigger analyzer rules.

use serde::{Deserialize, Serialize};

use crate::evolve::scope::Scope;

/// Source language of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// `.py`
    Python,
    /// `.rs`
    Rust,
}

impl Language {
    /// Pick the language for a target path.
    pub fn for_target(target: &str) -> Self {
        if target.ends_with(".rs") {
            Self::Rust
        } else {
            Self::Python
        }
    }

    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Rust => "rs",
        }
    }
}

/// A generated `(path, content)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Repository-relative path.
    pub path: String,
    /// Full file content.
    pub content: String,
    /// Source language.
    pub language: Language,
    /// Whether this is the test artifact.
    pub is_test: bool,
}

/// Words that must never appear in a generated file name.
const NAME_STOPWORDS: &[&str] = &[
    "security",
    "improvement",
    "enhancement",
    "optimization",
    "duplicate",
    "copy",
    "in",
    "the",
    "a",
    "an",
    "of",
    "to",
    "and",
    "for",
    "via",
    "with",
];

const MAX_SLUG_WORDS: usize = 5;

/// Lowercase, underscore-joined name stem for a description.
pub fn slug(description: &str) -> String {
    let lowered = description.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty() && !NAME_STOPWORDS.contains(w))
        .take(MAX_SLUG_WORDS)
        .collect();
    if words.is_empty() {
        "change".to_string()
    } else {
        words.join("_")
    }
}

fn pascal(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len());
    for word in slug.split('_') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    // Identifiers cannot start with a digit.
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, 'X');
    }
    out
}

/// Strip everything that could unbalance delimiters, open a string literal,
/// or match an analyzer rule once embedded in generated code.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | '\'' | '\\' | '*' | '`'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the module and test artifacts for a scope.
pub fn synthesize(scope: &Scope) -> Vec<Artifact> {
    let language = Language::for_target(&scope.target);
    let stem = format!(
        "{}_{}",
        slug(&scope.description),
        &scope.improvement_id[..scope.improvement_id.len().min(8)]
    );
    let dir = format!("evolution/{}", scope.kind.label());
    let ty = format!("{}Handler", pascal(&slug(&scope.description)));
    let description = sanitize(&scope.description);
    let target = sanitize(&scope.target);
    let ext = language.extension();

    match language {
        Language::Python => vec![
            Artifact {
                path: format!("{dir}/{stem}.{ext}"),
                content: python_module(&ty, &description, &target, &scope.improvement_id),
                language,
                is_test: false,
            },
            Artifact {
                path: format!("{dir}/test_{stem}.{ext}"),
                content: python_tests(&ty, &stem, &scope.improvement_id),
                language,
                is_test: true,
            },
        ],
        Language::Rust => vec![
            Artifact {
                path: format!("{dir}/{stem}.{ext}"),
                content: rust_module(&ty, &description, &target, &scope.improvement_id),
                language,
                is_test: false,
            },
            Artifact {
                path: format!("{dir}/{stem}_tests.{ext}"),
                content: rust_tests(&ty, &stem, &scope.improvement_id),
                language,
                is_test: true,
            },
        ],
    }
}

fn python_module(ty: &str, description: &str, target: &str, id: &str) -> String {
    format!(
        r#""""{description}

Target: {target}
"""
import logging

logger = logging.getLogger(__name__)

IMPROVEMENT_ID = "{id}"
TARGET = "{target}"


class {ty}:
    """Applies the change to payloads bound for the target."""

    def __init__(self):
        self.applied = 0

    def apply(self, payload):
        """Apply the change to one payload."""
        try:
            result = self._process(payload)
        except (TypeError, ValueError) as exc:
            logger.error("%s failed on %s: %s", IMPROVEMENT_ID, TARGET, exc)
            raise
        self.applied += 1
        logger.info("%s applied to %s", IMPROVEMENT_ID, TARGET)
        return result

    def _process(self, payload):
        if payload is None:
            raise ValueError("payload is required")
        return payload
"#
    )
}

fn python_tests(ty: &str, module: &str, id: &str) -> String {
    format!(
        r#""""Tests for {module}."""
import unittest

from {module} import IMPROVEMENT_ID, {ty}


class Test{ty}(unittest.TestCase):
    def test_apply_returns_payload(self):
        handler = {ty}()
        self.assertEqual(handler.apply("x"), "x")
        self.assertEqual(handler.applied, 1)

    def test_apply_rejects_none(self):
        with self.assertRaises(ValueError):
            {ty}().apply(None)

    def test_identifier(self):
        self.assertEqual(IMPROVEMENT_ID, "{id}")


if __name__ == "__main__":
    unittest.main()
"#
    )
}

fn rust_module(ty: &str, description: &str, target: &str, id: &str) -> String {
    format!(
        r#"//! {description}
//!
//! Target: {target}

use tracing::{{info, warn}};

/// Improvement this module implements.
pub const IMPROVEMENT_ID: &str = "{id}";
/// Area of the system it targets.
pub const TARGET: &str = "{target}";

/// Errors from applying the change.
#[derive(Debug, PartialEq, Eq)]
pub enum ApplyError {{
    /// The payload was empty.
    Empty,
}}

/// Applies the change to payloads bound for the target.
#[derive(Debug, Default)]
pub struct {ty} {{
    applied: u64,
}}

impl {ty} {{
    /// Apply the change to one payload.
    pub fn apply(&mut self, payload: &str) -> Result<String, ApplyError> {{
        if payload.is_empty() {{
            warn!(id = IMPROVEMENT_ID, target = TARGET, "empty payload");
            return Err(ApplyError::Empty);
        }}
        self.applied += 1;
        info!(id = IMPROVEMENT_ID, target = TARGET, "applied");
        Ok(payload.to_string())
    }}

    /// Number of payloads applied so far.
    pub fn applied(&self) -> u64 {{
        self.applied
    }}
}}
"#
    )
}

fn rust_tests(ty: &str, module: &str, id: &str) -> String {
    format!(
        r#"//! Tests for {module}.

use super::{module}::{{ApplyError, {ty}, IMPROVEMENT_ID}};

#[test]
fn apply_returns_payload() {{
    let mut handler = {ty}::default();
    assert_eq!(handler.apply("x"), Ok("x".to_string()));
    assert_eq!(handler.applied(), 1);
}}

#[test]
fn apply_rejects_empty() {{
    assert_eq!({ty}::default().apply(""), Err(ApplyError::Empty));
}}

#[test]
fn identifier_matches() {{
    assert_eq!(IMPROVEMENT_ID, "{id}");
}}
"#
    )
}

// ─── Static checks ────────────────────────────────────────────────────────────

/// Position of the first delimiter problem: the offending character and its
/// 1-based line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imbalance {
    /// Offending character (`'\0'` when the input ends with open delimiters).
    pub found: char,
    /// 1-based line number.
    pub line: usize,
}

/// Verify `()`, `[]` and `{}` nest correctly.
pub fn check_balance(content: &str) -> Result<(), Imbalance> {
    let mut stack: Vec<char> = Vec::new();
    let mut line = 1;
    for c in content.chars() {
        match c {
            '\n' => line += 1,
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let open = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return Err(Imbalance { found: c, line });
                }
            }
            _ => {}
        }
    }
    if stack.is_empty() {
        Ok(())
    } else {
        Err(Imbalance { found: '\0', line })
    }
}

/// Structural counts used by the quality rubric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Non-blank, non-comment lines.
    pub lines_of_code: u32,
    /// `def` / `fn` definitions outside test artifacts.
    pub functions: u32,
    /// `class` / `struct` / `enum` definitions outside test artifacts.
    pub types: u32,
    /// Test functions.
    pub tests: u32,
    /// Any logging call present.
    pub has_logging: bool,
    /// Any error handling present.
    pub has_error_handling: bool,
    /// Any docstring or doc comment present.
    pub has_docs: bool,
}

/// Count structure across a set of artifacts.
pub fn source_stats(artifacts: &[Artifact]) -> SourceStats {
    let mut s = SourceStats::default();
    for a in artifacts {
        let mut pending_test_attr = false;
        for raw in a.content.lines() {
            let t = raw.trim();
            if t.is_empty() {
                continue;
            }
            if t.starts_with("///") || t.starts_with("//!") || t.starts_with("\"\"\"") {
                s.has_docs = true;
            }
            if (t.starts_with('#') && !t.starts_with("#[")) || t.starts_with("//") {
                continue;
            }
            s.lines_of_code += 1;

            if ["logger.", "logging.", "info!(", "warn!("]
                .iter()
                .any(|m| t.contains(m))
            {
                s.has_logging = true;
            }
            if t.starts_with("try:")
                || t.starts_with("except")
                || t.starts_with("raise ")
                || t.contains("Result<")
                || t.contains("Err(")
            {
                s.has_error_handling = true;
            }

            if t == "#[test]" {
                pending_test_attr = true;
                continue;
            }
            let is_fn = t.starts_with("def ") || t.starts_with("fn ") || t.starts_with("pub fn ");
            if is_fn {
                if a.is_test && (t.starts_with("def test_") || pending_test_attr) {
                    s.tests += 1;
                } else if !a.is_test {
                    s.functions += 1;
                }
            }
            pending_test_attr = false;

            let is_type = ["class ", "struct ", "enum ", "pub struct ", "pub enum "]
                .iter()
                .any(|p| t.starts_with(p));
            if is_type && !a.is_test {
                s.types += 1;
            }
        }
    }
    s
}

/// Rubric score in `[0, 10]`.
pub fn quality_score(stats: &SourceStats) -> f64 {
    let mut score = 0.0;
    if stats.has_logging {
        score += 2.0;
    }
    if stats.has_error_handling {
        score += 2.0;
    }
    if stats.functions > 0 {
        score += 2.0;
    }
    if stats.types > 0 {
        score += 2.0;
    }
    if stats.has_docs {
        score += 1.5;
    }
    if stats.tests > 0 {
        score += 0.5;
    }
    f64::min(score, 10.0)
}
