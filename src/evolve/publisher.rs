//! # Publisher
//!
//! ## Responsibility
//! Commit the artifacts of a completed cycle somewhere durable and return the
//! commit id.
//!
//! ## Guarantees
//! - Artifact paths must be relative and free of `..`; anything else is refused
//!   before a single byte is written
//! - [`GitPublisher`] surfaces git's exit status and stderr on failure instead
//!   of panicking
//!
//! ## NOT Responsible For
//! - Timeouts: the engine wraps every `commit` call in
//!   `tokio::time::timeout(publisher.timeout())`
//! - Deciding whether a cycle is worth publishing

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use super::lifecycle::Artifact;

/// Default publish timeout.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

// ─── Types ────────────────────────────────────────────────────────────────────

/// Identifier of a published commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors from a publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// An artifact path escapes the working copy.
    #[error("refusing artifact path '{0}'")]
    InvalidPath(String),

    /// An artifact could not be written.
    #[error("write failed for {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A git process could not be spawned.
    #[error("process spawn failed: {0}")]
    Spawn(String),

    /// A git command exited unsuccessfully.
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        /// Command line that failed.
        command: String,
        /// Exit status text.
        status: String,
        /// First 500 chars of stderr.
        stderr: String,
    },

    /// Nothing to publish.
    #[error("no artifacts to publish")]
    Empty,

}

/// Commits a set of artifacts.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Commit `files` with `message`.
    async fn commit(&self, files: &[Artifact], message: &str) -> Result<CommitId, PublishError>;

    /// Upper bound the engine allows for one `commit` call.
    fn timeout(&self) -> Duration {
        DEFAULT_PUBLISH_TIMEOUT
    }

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Reject absolute paths and `..` components.
pub fn validate_relative(path: &str) -> Result<&Path, PublishError> {
    let p = Path::new(path);
    let ok = !path.is_empty()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(p)
    } else {
        Err(PublishError::InvalidPath(path.to_string()))
    }
}

// ─── Dry run ──────────────────────────────────────────────────────────────────

/// A commit recorded by [`DryRunPublisher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCommit {
    /// Synthetic id.
    pub id: CommitId,
    /// Commit message.
    pub message: String,
    /// Artifact paths.
    pub files: Vec<String>,
}

/// Records commits in memory and returns synthetic ids.
#[derive(Debug)]
pub struct DryRunPublisher {
    commits: Mutex<Vec<RecordedCommit>>,
    timeout: Duration,
}

impl Default for DryRunPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLISH_TIMEOUT)
    }
}

impl DryRunPublisher {
    /// Create a dry-run publisher.
    pub fn new(timeout: Duration) -> Self {
        Self {
            commits: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// Every commit recorded so far, oldest first.
    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.commits.lock().clone()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn commit(&self, files: &[Artifact], message: &str) -> Result<CommitId, PublishError> {
        if files.is_empty() {
            return Err(PublishError::Empty);
        }
        for f in files {
            validate_relative(&f.path)?;
        }

        let mut commits = self.commits.lock();
        let mut hasher = Sha256::new();
        hasher.update(commits.len().to_le_bytes());
        hasher.update(message.as_bytes());
        for f in files {
            hasher.update(f.path.as_bytes());
            hasher.update(f.content.as_bytes());
        }
        let id = CommitId(format!("dry-{}", &format!("{:x}", hasher.finalize())[..12]));
        commits.push(RecordedCommit {
            id: id.clone(),
            message: message.to_string(),
            files: files.iter().map(|f| f.path.clone()).collect(),
        });
        debug!(commit = %id, files = files.len(), "dry-run commit recorded");
        Ok(id)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn name(&self) -> &'static str {
        "dry_run"
    }
}

// ─── Git ──────────────────────────────────────────────────────────────────────

/// Settings for [`GitPublisher`].
#[derive(Debug, Clone)]
pub struct GitPublisherConfig {
    /// Working copy to write into.
    pub repo_path: PathBuf,
    /// Remote to push to.
    pub remote: String,
    /// Branch to push.
    pub branch: String,
    /// Push after committing.
    pub push: bool,
    /// Upper bound for one publish.
    pub timeout: Duration,
}

impl Default for GitPublisherConfig {
    fn default() -> Self {
        Self {
            repo_path: PathBuf::from("."),
            remote: "origin".to_string(),
            branch: "main".to_string(),
            push: false,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

/// Writes artifacts into a git working copy and commits them.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    cfg: GitPublisherConfig,
}

impl GitPublisher {
    /// Create a publisher for the working copy in `cfg.repo_path`.
    pub fn new(cfg: GitPublisherConfig) -> Self {
        Self { cfg }
    }

    async fn git_output(&self, args: &[&str]) -> Result<std::process::Output, PublishError> {
        use tokio::process::Command;

        Command::new("git")
            .args(args)
            .current_dir(&self.cfg.repo_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PublishError::Spawn(format!("git {}: {e}", args.join(" "))))
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, PublishError> {
        let output = self.git_output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(command_failed(args, &output))
        }
    }

    /// `true` when the index differs from HEAD. An unborn HEAD with staged
    /// files counts as a difference.
    async fn has_staged_changes(&self) -> Result<bool, PublishError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.git_output(&args).await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(command_failed(&args, &output)),
        }
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn commit(&self, files: &[Artifact], message: &str) -> Result<CommitId, PublishError> {
        if files.is_empty() {
            return Err(PublishError::Empty);
        }
        for f in files {
            validate_relative(&f.path)?;
        }

        for f in files {
            let dest = self.cfg.repo_path.join(&f.path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_err(parent, e))?;
            }
            tokio::fs::write(&dest, &f.content)
                .await
                .map_err(|e| io_err(&dest, e))?;
        }

        let mut add: Vec<&str> = vec!["add", "--"];
        add.extend(files.iter().map(|f| f.path.as_str()));
        self.run_git(&add).await?;
        // A retry after a failed push or a timeout finds its files already
        // committed; HEAD is then the commit to report.
        let committed = self.has_staged_changes().await?;
        if committed {
            self.run_git(&["commit", "-m", message]).await?;
        } else {
            debug!(repo = %self.cfg.repo_path.display(), "artifacts already committed");
        }
        let head = self.run_git(&["rev-parse", "HEAD"]).await?;

        if self.cfg.push {
            self.run_git(&["push", &self.cfg.remote, &self.cfg.branch])
                .await?;
        }

        info!(
            commit = %head,
            files = files.len(),
            pushed = self.cfg.push,
            new_commit = committed,
            repo = %self.cfg.repo_path.display(),
            "artifacts committed"
        );
        Ok(CommitId(head))
    }

    fn timeout(&self) -> Duration {
        self.cfg.timeout
    }

    fn name(&self) -> &'static str {
        "git"
    }
}

fn command_failed(args: &[&str], output: &std::process::Output) -> PublishError {
    PublishError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr)
            .chars()
            .take(500)
            .collect(),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolve::lifecycle::Language;

    fn artifact(path: &str) -> Artifact {
        Artifact {
            path: path.to_string(),
            content: format!("content of {path}\n"),
            language: Language::Python,
            is_test: false,
        }
    }

    #[test]
    fn test_validate_relative() {
        assert!(validate_relative("evolution/security/a.py").is_ok());
        assert!(validate_relative("./a.py").is_ok());
        assert!(validate_relative("/etc/passwd").is_err());
        assert!(validate_relative("../escape.py").is_err());
        assert!(validate_relative("a/../../b.py").is_err());
        assert!(validate_relative("").is_err());
    }

    #[tokio::test]
    async fn test_dry_run_records_commits_with_distinct_ids() {
        let p = DryRunPublisher::default();
        let a = p.commit(&[artifact("a.py")], "first").await.unwrap();
        let b = p.commit(&[artifact("a.py")], "first").await.unwrap();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("dry-"));
        let commits = p.commits();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].files, vec!["a.py".to_string()]);
    }

    #[tokio::test]
    async fn test_dry_run_refuses_empty_and_escaping_paths() {
        let p = DryRunPublisher::default();
        assert!(matches!(p.commit(&[], "m").await, Err(PublishError::Empty)));
        assert!(matches!(
            p.commit(&[artifact("../x.py")], "m").await,
            Err(PublishError::InvalidPath(_))
        ));
        assert!(p.commits().is_empty());
    }

    fn git(dir: &Path, args: &[&str]) -> Option<String> {
        let out = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .ok()?;
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    /// A fresh repository with a committer identity, or `None` without git.
    fn git_repo() -> Option<tempfile::TempDir> {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"])?;
        git(dir.path(), &["config", "user.email", "engine@example.com"])?;
        git(dir.path(), &["config", "user.name", "Evolution Engine"])?;
        git(dir.path(), &["config", "commit.gpgsign", "false"])?;
        Some(dir)
    }

    fn git_publisher(dir: &Path, push: bool) -> GitPublisher {
        GitPublisher::new(GitPublisherConfig {
            repo_path: dir.to_path_buf(),
            remote: "nosuchremote".to_string(),
            branch: "main".to_string(),
            push,
            ..GitPublisherConfig::default()
        })
    }

    #[tokio::test]
    async fn test_git_publisher_commits_and_reports_head() {
        let Some(repo) = git_repo() else { return };
        let p = git_publisher(repo.path(), false);

        let id = p
            .commit(&[artifact("evolution/security/a.py")], "evolve: a")
            .await
            .unwrap();
        assert_eq!(Some(id.0.clone()), git(repo.path(), &["rev-parse", "HEAD"]));
        assert_eq!(
            git(repo.path(), &["log", "-1", "--format=%s"]).as_deref(),
            Some("evolve: a")
        );
        assert!(repo.path().join("evolution/security/a.py").exists());
    }

    #[tokio::test]
    async fn test_git_retry_after_failed_push_reuses_commit() {
        let Some(repo) = git_repo() else { return };
        let files = [artifact("evolution/security/a.py")];

        let pushing = git_publisher(repo.path(), true);
        for _ in 0..2 {
            match pushing.commit(&files, "evolve: a").await {
                Err(PublishError::CommandFailed { command, .. }) => {
                    assert!(command.starts_with("git push"), "{command}");
                }
                other => panic!("expected push failure, got {other:?}"),
            }
        }

        let head = git(repo.path(), &["rev-parse", "HEAD"]).unwrap();
        let id = git_publisher(repo.path(), false)
            .commit(&files, "evolve: a")
            .await
            .unwrap();
        assert_eq!(id.0, head);
        assert_eq!(
            git(repo.path(), &["rev-list", "--count", "HEAD"]).as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_git_changed_content_makes_new_commit() {
        let Some(repo) = git_repo() else { return };
        let p = git_publisher(repo.path(), false);

        let first = p.commit(&[artifact("a.py")], "first").await.unwrap();
        let mut changed = artifact("a.py");
        changed.content.push_str("more\n");
        let second = p.commit(&[changed], "second").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            git(repo.path(), &["rev-list", "--count", "HEAD"]).as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_git_publisher_fails_cleanly_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let p = GitPublisher::new(GitPublisherConfig {
            repo_path: dir.path().to_path_buf(),
            ..GitPublisherConfig::default()
        });
        // Either git is missing (Spawn) or the directory is not a repository
        // (CommandFailed); both are errors, never a panic.
        let result = p.commit(&[artifact("evolution/a.py")], "msg").await;
        assert!(matches!(
            result,
            Err(PublishError::Spawn(_)) | Err(PublishError::CommandFailed { .. })
        ));
        assert!(dir.path().join("evolution/a.py").exists());
    }
}
