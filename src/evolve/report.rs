//! Cycle report rendering and archiving.
//!
//! [`render_markdown`] is pure. [`ReportArchive`] writes `<report-id>.json`
//! and `<report-id>.md` side by side for every cycle it is handed.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::lifecycle::{CycleReport, CycleStatus};

/// Errors from the report archive.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The archive directory or a report file could not be written.
    #[error("report I/O error on {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The report could not be encoded.
    #[error("report encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pretty JSON for a report.
pub fn to_json(report: &CycleReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Render a report as Markdown.
pub fn render_markdown(report: &CycleReport) -> String {
    let imp = &report.improvement;
    let status = match report.status {
        CycleStatus::Completed => "✅ COMPLETED",
        CycleStatus::Failed => "❌ FAILED",
    };

    let mut md = String::new();
    let _ = writeln!(md, "# Evolution cycle `{}`\n", report.id);
    let _ = writeln!(md, "- **Status**: {status}");
    let _ = writeln!(md, "- **Improvement**: `{}` ({})", imp.id, imp.kind);
    let _ = writeln!(md, "- **Description**: {}", imp.description);
    let _ = writeln!(md, "- **Target**: `{}`", imp.target);
    let _ = writeln!(
        md,
        "- **Overall score**: {:.2} / 10",
        report.overall_success_score
    );
    let _ = writeln!(
        md,
        "- **Started**: {}  **Finished**: {}",
        report.started_at.to_rfc3339(),
        report.finished_at.to_rfc3339()
    );
    if let Some(commit) = &report.commit_id {
        let _ = writeln!(md, "- **Commit**: `{commit}`");
    }
    md.push('\n');

    if let Some(err) = &report.error {
        let _ = writeln!(md, "## Error\n");
        let _ = writeln!(md, "- **Phase**: {}", err.phase);
        let _ = writeln!(md, "- **Kind**: {}", err.kind);
        let _ = writeln!(md, "- **Message**: {}\n", err.message);
    }

    if let Some(scope) = &report.scope {
        let _ = writeln!(md, "## Scope\n");
        let _ = writeln!(
            md,
            "- **Priority**: {}  **Effort**: {}",
            scope.priority_level.label(),
            scope.estimated_effort.label()
        );
        let _ = writeln!(md, "- **Justification**: {}", scope.business_justification);
        let _ = writeln!(md, "- **Capability gap**: {}", scope.capability_gap);
        let _ = writeln!(md, "- **User benefit**: {}\n", scope.user_benefit);
        let _ = writeln!(md, "### Requirements\n");
        for r in &scope.technical_requirements {
            let _ = writeln!(md, "- {r}");
        }
        md.push('\n');
    }

    if let Some(i) = &report.implementation {
        let _ = writeln!(md, "## Implementation\n");
        let _ = writeln!(
            md,
            "| Lines | Functions | Types | Tests | Quality |\n|------:|----------:|------:|------:|--------:|\n| {} | {} | {} | {} | {:.1} |\n",
            i.lines_of_code, i.functions_added, i.classes_added, i.tests_created, i.quality_score
        );
        for f in &i.files_created {
            let _ = writeln!(md, "- created `{f}`");
        }
        for r in &i.validation.rejected {
            let _ = writeln!(md, "- rejected `{}`: {}", r.path, r.reason);
        }
        md.push('\n');
    }

    if let Some(a) = &report.analysis {
        let _ = writeln!(md, "## Analysis\n");
        let _ = writeln!(md, "- **CPU impact**: {:+.1}%", a.cpu_impact_pct);
        let _ = writeln!(md, "- **Memory**: ~{} KB", a.memory_usage.estimated_kb);
        let _ = writeln!(md, "- **Success rate**: {:.1}%", a.success_rate * 100.0);
        let _ = writeln!(md, "- **Error rate**: {:.2}%\n", a.error_rate * 100.0);
    }

    if let Some(r) = &report.integration {
        let _ = writeln!(md, "## Integration\n");
        let _ = writeln!(
            md,
            "- **Tests**: {} passed, {} failed",
            r.tests_passed, r.tests_failed
        );
        let _ = writeln!(md, "- **Strategy**: {:?}", r.deployment_strategy);
        let _ = writeln!(md, "- **Rollback**: {}\n", r.rollback_plan);
    }

    if let Some(b) = &report.benefits {
        let _ = writeln!(md, "## Benefits\n");
        let _ = writeln!(md, "- **ROI**: {:.0}%", b.roi_pct);
        let _ = writeln!(md, "- **Competitive score**: {:.2}", b.competitive_score);
        let _ = writeln!(md, "- **UX score**: {:.1}", b.ux_score);
        for h in &b.immediate_benefits.highlights {
            let _ = writeln!(md, "- {h}");
        }
        md.push('\n');
    }

    if !report.transitions.is_empty() {
        let _ = writeln!(md, "## Transitions\n");
        for t in &report.transitions {
            let _ = writeln!(md, "- {} → {} ({} ms)", t.from, t.to, t.duration_ms);
        }
    }
    md
}

/// Directory receiving one JSON and one Markdown file per cycle.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    /// Archive into `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Archive directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write both renderings; returns `(json_path, markdown_path)`.
    pub fn write(&self, report: &CycleReport) -> Result<(PathBuf, PathBuf), ReportError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let json_path = self.dir.join(format!("{}.json", report.id));
        let md_path = self.dir.join(format!("{}.md", report.id));
        fs::write(&json_path, to_json(report)?).map_err(|e| io_err(&json_path, e))?;
        fs::write(&md_path, render_markdown(report)).map_err(|e| io_err(&md_path, e))?;
        debug!(report = %report.id, dir = %self.dir.display(), "report archived");
        Ok((json_path, md_path))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> ReportError {
    ReportError::Io {
        path: path.display().to_string(),
        source,
    }
}
