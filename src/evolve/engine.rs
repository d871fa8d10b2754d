//! # Evolution Engine
//!
//! ## Responsibility
//! Run one evolution cycle end to end: scan, select, run the lifecycle,
//! publish, and only then record the improvement as completed and its
//! artifact hashes as seen. Optionally repeat on a timer.
//!
//! ## Guarantees
//! - Single flight: a cycle triggered while another runs returns
//!   [`CycleOutcome::Busy`] without touching any state
//! - Publishing is bounded by `tokio::time::timeout(publisher.timeout())`
//! - Dropping a cycle future (or crashing) before publish completes leaves the
//!   completed-id and seen-hash sets unchanged for that improvement
//! - Spam-rejected improvements stay eligible for later cycles
//! - A published cycle is always logged; a failure to record it afterwards is
//!   returned as [`EngineError::Store`]
//! - Lifecycle phases and file-backed writes run on the blocking pool
//!
//! ## NOT Responsible For
//! - What the phases compute (see `lifecycle::phases`)
//! - How artifacts are committed (see `publisher`)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::analyzer::{AnalyzerConfig, CodeAnalyzer, Finding, ScanStats};
use super::guard::{ContentGuard, GuardConfig};
use super::lifecycle::{
    CycleReport, CycleStatus, ImplementationLifecycle, LifecycleError, LifecyclePhases,
    StandardPhases,
};
use super::persistence::{JsonlLog, LogRecord, MemoryLog, PersistenceLog};
use super::publisher::{DryRunPublisher, GitPublisher, GitPublisherConfig, Publisher};
use super::report::ReportArchive;
use super::selector::{default_templates, Improvement, ImprovementSelector};
use super::store::{FileIdStore, IdStore, MemoryIdStore, StoreError};
use crate::config::{EngineConfig, PublisherMode, SchedulerSection};
use crate::{metrics, EngineError};

/// File name of the completed-ids store inside `state_dir`.
pub const COMPLETED_FILE: &str = "completed_improvements.txt";
/// File name of the seen-hash store inside `state_dir`.
pub const HASHES_FILE: &str = "content_hashes.txt";
/// File name of the JSONL log inside `state_dir`.
pub const LOG_FILE: &str = "evolution_log.jsonl";

// ─── Outcome & status ─────────────────────────────────────────────────────────

/// What one call to [`EvolutionEngine::run_cycle`] did.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The lifecycle completed and the artifacts were published.
    Completed(Box<CycleReport>),
    /// A phase or the publish step failed.
    Failed(Box<CycleReport>),
    /// The guard refused every artifact; the improvement stays eligible.
    SpamRejected(Box<CycleReport>),
    /// Nothing is left to improve.
    EvolutionComplete,
    /// Another cycle is in flight.
    Busy,
}

impl CycleOutcome {
    /// The report, for outcomes that ran the lifecycle.
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(r) | Self::Failed(r) | Self::SpamRejected(r) => Some(r),
            Self::EvolutionComplete | Self::Busy => None,
        }
    }

    /// Short snake_case label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::SpamRejected(_) => "spam_rejected",
            Self::EvolutionComplete => "evolution_complete",
            Self::Busy => "busy",
        }
    }
}

/// Counters and state sizes since construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Cycles that ran the lifecycle.
    pub cycles_run: u64,
    /// Cycles that completed and published.
    pub completed: u64,
    /// Cycles that failed in a phase or while publishing.
    pub failed: u64,
    /// Cycles whose artifacts were all rejected.
    pub spam_rejected: u64,
    /// Triggers refused because a cycle was in flight.
    pub busy_skips: u64,
    /// Size of the completed-id set.
    pub completed_ids: usize,
    /// Size of the seen-hash set.
    pub seen_hashes: usize,
    /// When the last cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Outcome label of the last trigger.
    pub last_outcome: Option<String>,
    /// Whether a cycle is running right now.
    pub cycle_in_flight: bool,
}

// ─── Builder ──────────────────────────────────────────────────────────────────

/// Assembles an [`EvolutionEngine`]. Anything not supplied gets an in-memory
/// default.
pub struct EngineBuilder {
    root: PathBuf,
    analyzer: AnalyzerConfig,
    selector: Option<ImprovementSelector>,
    guard_config: GuardConfig,
    guard: Option<Arc<ContentGuard>>,
    completed: Option<Arc<dyn IdStore>>,
    hashes: Option<Arc<dyn IdStore>>,
    phases: Option<Arc<dyn LifecyclePhases>>,
    publisher: Option<Arc<dyn Publisher>>,
    log: Option<Arc<dyn PersistenceLog>>,
    archive: Option<ReportArchive>,
    target_repository: String,
    log_capacity: usize,
}

impl EngineBuilder {
    /// Start a builder that scans `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            analyzer: AnalyzerConfig::default(),
            selector: None,
            guard_config: GuardConfig::default(),
            guard: None,
            completed: None,
            hashes: None,
            phases: None,
            publisher: None,
            log: None,
            archive: None,
            target_repository: String::new(),
            log_capacity: 1000,
        }
    }

    /// Analyzer settings.
    pub fn analyzer_config(mut self, cfg: AnalyzerConfig) -> Self {
        self.analyzer = cfg;
        self
    }

    /// Improvement selector.
    pub fn selector(mut self, selector: ImprovementSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Guard settings, used when no guard is supplied.
    pub fn guard_config(mut self, cfg: GuardConfig) -> Self {
        self.guard_config = cfg;
        self
    }

    /// A ready-made guard. Custom phases that screen artifacts must share it.
    pub fn guard(mut self, guard: Arc<ContentGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Completed-improvement store.
    pub fn completed_store(mut self, store: Arc<dyn IdStore>) -> Self {
        self.completed = Some(store);
        self
    }

    /// Seen-hash store, used when no guard is supplied.
    pub fn hash_store(mut self, store: Arc<dyn IdStore>) -> Self {
        self.hashes = Some(store);
        self
    }

    /// Lifecycle phases. Defaults to [`StandardPhases`] over the guard.
    pub fn phases(mut self, phases: Arc<dyn LifecyclePhases>) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Artifact publisher. Defaults to [`DryRunPublisher`].
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Cycle log. Defaults to a bounded [`MemoryLog`].
    pub fn log(mut self, log: Arc<dyn PersistenceLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Archive every report into a directory.
    pub fn archive(mut self, archive: ReportArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Repository identifier used in commit messages.
    pub fn target_repository(mut self, repo: impl Into<String>) -> Self {
        self.target_repository = repo.into();
        self
    }

    /// Capacity of the default in-memory log.
    pub fn log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    /// Returns [`EngineError::Analyzer`] or [`EngineError::Guard`] when a
    /// pattern fails to compile.
    pub fn build(self) -> Result<EvolutionEngine, EngineError> {
        let analyzer = CodeAnalyzer::new(self.analyzer)?;
        let guard = match self.guard {
            Some(g) => g,
            None => {
                let hashes = self
                    .hashes
                    .unwrap_or_else(|| Arc::new(MemoryIdStore::new()));
                Arc::new(ContentGuard::new(self.guard_config, hashes)?)
            }
        };
        let phases = self
            .phases
            .unwrap_or_else(|| Arc::new(StandardPhases::new(guard.clone())));
        let log_capacity = self.log_capacity;

        Ok(EvolutionEngine {
            root: self.root,
            analyzer,
            selector: self.selector.unwrap_or_default(),
            guard,
            completed: self
                .completed
                .unwrap_or_else(|| Arc::new(MemoryIdStore::new())),
            lifecycle: ImplementationLifecycle::new(phases),
            publisher: self
                .publisher
                .unwrap_or_else(|| Arc::new(DryRunPublisher::default())),
            log: self
                .log
                .unwrap_or_else(|| Arc::new(MemoryLog::new(log_capacity))),
            archive: self.archive,
            target_repository: self.target_repository,
            cycle_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(EngineStatus::default()),
        })
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Scans, selects, implements and publishes improvements one cycle at a time.
pub struct EvolutionEngine {
    root: PathBuf,
    analyzer: CodeAnalyzer,
    selector: ImprovementSelector,
    guard: Arc<ContentGuard>,
    completed: Arc<dyn IdStore>,
    lifecycle: ImplementationLifecycle,
    publisher: Arc<dyn Publisher>,
    log: Arc<dyn PersistenceLog>,
    archive: Option<ReportArchive>,
    target_repository: String,
    cycle_lock: tokio::sync::Mutex<()>,
    status: Mutex<EngineStatus>,
}

impl EvolutionEngine {
    /// Start a builder that scans `root`.
    pub fn builder(root: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder::new(root)
    }

    /// Build an engine from configuration. File-backed stores and a JSONL log
    /// are used when `engine.state_dir` is set, in-memory ones otherwise.
    ///
    /// # Errors
    /// Returns [`EngineError`] when a store cannot be opened or a pattern
    /// fails to compile.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, EngineError> {
        let mut builder = EngineBuilder::new(cfg.analyzer.root.clone())
            .analyzer_config(cfg.analyzer.to_analyzer_config())
            .selector(ImprovementSelector::new(
                default_templates(),
                cfg.selector.use_fallback,
            ))
            .guard_config(cfg.guard.to_guard_config())
            .target_repository(cfg.publisher.target_repository.clone())
            .log_capacity(cfg.engine.log_capacity);

        if let Some(dir) = &cfg.engine.state_dir {
            builder = builder
                .completed_store(Arc::new(FileIdStore::open(dir.join(COMPLETED_FILE))?))
                .hash_store(Arc::new(FileIdStore::open(dir.join(HASHES_FILE))?))
                .log(Arc::new(JsonlLog::open(dir.join(LOG_FILE))?));
        }
        if let Some(dir) = &cfg.engine.reports_dir {
            builder = builder.archive(ReportArchive::new(dir.clone()));
        }

        let publisher: Arc<dyn Publisher> = match cfg.publisher.mode {
            PublisherMode::DryRun => Arc::new(DryRunPublisher::new(cfg.publisher.timeout())),
            PublisherMode::Git => Arc::new(GitPublisher::new(GitPublisherConfig {
                repo_path: cfg.publisher.repo_path.clone(),
                remote: cfg.publisher.remote.clone(),
                branch: cfg.publisher.branch.clone(),
                push: cfg.publisher.push,
                timeout: cfg.publisher.timeout(),
            })),
        };

        info!(
            name = %cfg.engine.name,
            root = %cfg.analyzer.root.display(),
            durable = cfg.engine.state_dir.is_some(),
            publisher = publisher.name(),
            "evolution engine configured"
        );
        builder.publisher(publisher).build()
    }

    /// Root of the scanned tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The content guard.
    pub fn guard(&self) -> &Arc<ContentGuard> {
        &self.guard
    }

    /// The completed-improvement store.
    pub fn completed_store(&self) -> &Arc<dyn IdStore> {
        &self.completed
    }

    /// The cycle log.
    pub fn log(&self) -> &Arc<dyn PersistenceLog> {
        &self.log
    }

    /// Scan the tree without running a cycle.
    ///
    /// # Errors
    /// Returns [`EngineError::Task`] if the blocking scan task panicked.
    pub async fn scan(&self) -> Result<(Vec<Finding>, ScanStats), EngineError> {
        let analyzer = self.analyzer.clone();
        let root = self.root.clone();
        let (findings, stats) = tokio::task::spawn_blocking(move || analyzer.scan_all(root))
            .await
            .map_err(|e| EngineError::Task(format!("scan task failed: {e}")))?;
        for (kind, n) in &stats.by_kind {
            metrics::add_findings(kind, *n as u64);
        }
        debug!(
            files = stats.files_scanned,
            skipped = stats.files_skipped,
            findings = stats.findings,
            "scan finished"
        );
        Ok((findings, stats))
    }

    /// Improvements still pending, in selection order.
    ///
    /// # Errors
    /// See [`scan`](Self::scan).
    pub async fn pending(&self) -> Result<Vec<Improvement>, EngineError> {
        let (findings, _) = self.scan().await?;
        Ok(self.selector.pending(&findings, self.completed.as_ref()))
    }

    /// Run one cycle.
    ///
    /// # Errors
    /// Returns [`EngineError`] only for infrastructure failures: a scan or
    /// lifecycle task panicking, or a store write failing after a successful
    /// publish. In the latter case the cycle has already been logged with its
    /// commit id. Phase and publish failures are reported as
    /// [`CycleOutcome::Failed`].
    pub async fn run_cycle(&self) -> Result<CycleOutcome, EngineError> {
        let Ok(_flight) = self.cycle_lock.try_lock() else {
            let mut st = self.status.lock();
            st.busy_skips += 1;
            st.last_outcome = Some("busy".to_string());
            debug!("cycle already in flight; trigger skipped");
            return Ok(CycleOutcome::Busy);
        };
        let result = self.run_cycle_locked().await;
        if let Ok(outcome) = &result {
            self.status.lock().last_outcome = Some(outcome.label().to_string());
        }
        result
    }

    async fn run_cycle_locked(&self) -> Result<CycleOutcome, EngineError> {
        let (findings, stats) = self.scan().await?;
        info!(
            findings = findings.len(),
            files = stats.files_scanned,
            completed = self.completed.len(),
            "evolution cycle started"
        );

        let Some(improvement) = self.selector.next(&findings, self.completed.as_ref()) else {
            info!("no pending improvements; evolution complete");
            return Ok(CycleOutcome::EvolutionComplete);
        };
        info!(
            improvement = %improvement.id,
            kind = %improvement.kind,
            priority = improvement.priority,
            target = %improvement.target,
            "improvement selected"
        );

        let lifecycle = self.lifecycle.clone();
        let report = tokio::task::spawn_blocking(move || lifecycle.run(&improvement))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?;

        let (outcome, recorded) = match report.status {
            CycleStatus::Failed if report.is_spam_rejected() => {
                metrics::inc_spam_rejected();
                (CycleOutcome::SpamRejected(Box::new(report)), Ok(()))
            }
            CycleStatus::Failed => (CycleOutcome::Failed(Box::new(report)), Ok(())),
            CycleStatus::Completed => self.publish(report).await,
        };

        // The commit already exists, so the cycle is logged even when
        // recording it failed.
        if let Some(report) = outcome.report() {
            self.finish(report, &outcome).await;
        }
        recorded?;
        Ok(outcome)
    }

    /// Publish a completed report. The second element carries a failure to
    /// record the published improvement; the outcome is `Completed` either way.
    async fn publish(&self, report: CycleReport) -> (CycleOutcome, Result<(), EngineError>) {
        let message = self.commit_message(&report);
        let timeout = self.publisher.timeout();
        let published = tokio::time::timeout(
            timeout,
            self.publisher.commit(report.artifacts(), &message),
        )
        .await;

        let commit = match published {
            Ok(Ok(commit)) => commit,
            Ok(Err(e)) => {
                error!(improvement = %report.improvement.id, err = %e, "publish failed");
                let report = report.into_failed_publish(LifecycleError::Publish(e.to_string()));
                return (CycleOutcome::Failed(Box::new(report)), Ok(()));
            }
            Err(_) => {
                error!(improvement = %report.improvement.id, ?timeout, "publish timed out");
                let report = report.into_failed_publish(LifecycleError::Publish(format!(
                    "timed out after {timeout:?}"
                )));
                return (CycleOutcome::Failed(Box::new(report)), Ok(()));
            }
        };

        // Published: only now does the improvement count as done.
        let recorded = self.record_published(&report).await;
        match &recorded {
            Ok(()) => info!(
                improvement = %report.improvement.id,
                commit = %commit,
                score = report.overall_success_score,
                "improvement published"
            ),
            Err(e) => error!(
                improvement = %report.improvement.id,
                commit = %commit,
                err = %e,
                "improvement published but not recorded"
            ),
        }
        (
            CycleOutcome::Completed(Box::new(report.into_published(commit.0))),
            recorded,
        )
    }

    /// Record the improvement id, then every admitted artifact hash. A failed id
    /// write leaves both sets untouched.
    async fn record_published(&self, report: &CycleReport) -> Result<(), EngineError> {
        let completed = Arc::clone(&self.completed);
        let guard = Arc::clone(&self.guard);
        let id = report.improvement.id.clone();
        let admitted = report
            .implementation
            .as_ref()
            .map(|i| i.validation.admitted.clone())
            .unwrap_or_default();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            completed.add(&id)?;
            for admission in &admitted {
                guard.record(admission)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))??;
        Ok(())
    }

    fn commit_message(&self, report: &CycleReport) -> String {
        let imp = &report.improvement;
        let mut msg = format!("evolve({}): {}\n\n", imp.kind, imp.description);
        msg.push_str(&format!("Improvement: {}\n", imp.id));
        msg.push_str(&format!("Target: {}\n", imp.target));
        msg.push_str(&format!("Score: {:.2}\n", report.overall_success_score));
        if !self.target_repository.is_empty() {
            msg.push_str(&format!("Repository: {}\n", self.target_repository));
        }
        msg
    }

    async fn finish(&self, report: &CycleReport, outcome: &CycleOutcome) {
        metrics::record_cycle(outcome.label(), report.overall_success_score);

        let log = Arc::clone(&self.log);
        let archive = self.archive.clone();
        let owned = report.clone();
        let written = tokio::task::spawn_blocking(move || {
            if let Err(e) = log.append(&LogRecord::from_report(&owned)) {
                warn!(err = %e, report = %owned.id, "failed to append cycle log");
            }
            if let Some(archive) = &archive {
                if let Err(e) = archive.write(&owned) {
                    warn!(err = %e, report = %owned.id, "failed to archive report");
                }
            }
        })
        .await;
        if let Err(e) = written {
            warn!(err = %e, report = %report.id, "report writer task failed");
        }

        let mut st = self.status.lock();
        st.cycles_run += 1;
        match outcome {
            CycleOutcome::Completed(_) => st.completed += 1,
            CycleOutcome::Failed(_) => st.failed += 1,
            CycleOutcome::SpamRejected(_) => st.spam_rejected += 1,
            CycleOutcome::EvolutionComplete | CycleOutcome::Busy => {}
        }
        st.last_cycle_at = Some(report.finished_at);
    }

    /// Snapshot of counters and state sizes.
    pub fn status(&self) -> EngineStatus {
        let mut st = self.status.lock().clone();
        st.completed_ids = self.completed.len();
        st.seen_hashes = self.guard.seen_count();
        st.cycle_in_flight = self.cycle_lock.try_lock().is_err();
        st
    }

    /// Run cycles every `interval` on a background task until shutdown, or
    /// until nothing is left when `stop_when_complete` is set.
    pub fn spawn(self: Arc<Self>, interval: Duration, stop_when_complete: bool) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_cycle().await {
                            Ok(CycleOutcome::EvolutionComplete) if stop_when_complete => {
                                info!("evolution complete; scheduler exiting");
                                break;
                            }
                            Ok(outcome) => debug!(outcome = outcome.label(), "scheduled cycle finished"),
                            Err(e) => error!(err = %e, "scheduled cycle failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("scheduler shutdown signal received");
                        break;
                    }
                }
            }
        });
        SchedulerHandle { shutdown_tx, join }
    }

    /// Start the scheduler described by `scheduler`. Returns `None`, and starts
    /// nothing, when it is disabled.
    pub fn spawn_configured(self: Arc<Self>, scheduler: &SchedulerSection) -> Option<SchedulerHandle> {
        if !scheduler.enabled {
            info!("scheduler disabled");
            return None;
        }
        let interval = scheduler.interval();
        info!(?interval, "scheduler starting");
        Some(self.spawn(interval, scheduler.stop_when_complete))
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Ask the scheduler to stop and wait for it. A cycle already running is
    /// allowed to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(err = %e, "scheduler task ended abnormally");
        }
    }

    /// Wait for the scheduler to exit on its own.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            warn!(err = %e, "scheduler task ended abnormally");
        }
    }

    /// Return `true` once the scheduler task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, body).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_cycle_completes_and_records_state() {
        let dir = tree_with(&[("app.py", "x = eval(input())\n")]);
        let engine = EvolutionEngine::builder(dir.path())
            .selector(ImprovementSelector::findings_only())
            .build()
            .unwrap();

        let outcome = engine.run_cycle().await.unwrap();
        let report = match outcome {
            CycleOutcome::Completed(r) => r,
            other => panic!("expected completed, got {}", other.label()),
        };
        assert!(report.commit_id.is_some());
        let st = engine.status();
        assert_eq!(st.completed, 1);
        assert_eq!(st.completed_ids, 1);
        assert_eq!(st.seen_hashes, 2);
        assert_eq!(engine.log().list_recent(5).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_tree_with_findings_only_is_complete() {
        let dir = tree_with(&[]);
        let engine = EvolutionEngine::builder(dir.path())
            .selector(ImprovementSelector::findings_only())
            .build()
            .unwrap();
        assert!(matches!(
            engine.run_cycle().await.unwrap(),
            CycleOutcome::EvolutionComplete
        ));
        assert_eq!(engine.status().cycles_run, 0);
    }

    #[tokio::test]
    async fn test_fallback_template_when_no_findings() {
        let dir = tree_with(&[("clean.py", "def ok():\n    return 1\n")]);
        let engine = EvolutionEngine::builder(dir.path()).build().unwrap();
        let outcome = engine.run_cycle().await.unwrap();
        assert_eq!(outcome.report().unwrap().improvement.source, "monitoring");
    }

    #[tokio::test]
    async fn test_commit_message_mentions_repository() {
        let dir = tree_with(&[("app.py", "x = eval(input())\n")]);
        let publisher = Arc::new(DryRunPublisher::default());
        let engine = EvolutionEngine::builder(dir.path())
            .publisher(publisher.clone())
            .target_repository("acme/service")
            .build()
            .unwrap();
        engine.run_cycle().await.unwrap();
        let commits = publisher.commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].message.starts_with("evolve(security):"));
        assert!(commits[0].message.contains("Repository: acme/service"));
        assert_eq!(commits[0].files.len(), 2);
    }

    /// An id store whose writes always fail.
    struct ReadOnlyStore;

    impl IdStore for ReadOnlyStore {
        fn contains(&self, _id: &str) -> bool {
            false
        }
        fn add(&self, _id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Io {
                path: "completed_improvements.txt".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
        fn len(&self) -> usize {
            0
        }
        fn clear(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_after_publish_still_logs_commit() {
        let dir = tree_with(&[("app.py", "x = eval(input())\n")]);
        let publisher = Arc::new(DryRunPublisher::default());
        let hashes = Arc::new(MemoryIdStore::new());
        let engine = EvolutionEngine::builder(dir.path())
            .selector(ImprovementSelector::findings_only())
            .completed_store(Arc::new(ReadOnlyStore))
            .hash_store(hashes.clone())
            .publisher(publisher.clone())
            .build()
            .unwrap();

        let err = engine.run_cycle().await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)), "got {err}");
        assert_eq!(publisher.commits().len(), 1);

        let records = engine.log().list_recent(5).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert!(records[0].commit_id.is_some());

        assert!(hashes.is_empty());
        let st = engine.status();
        assert_eq!(st.cycles_run, 1);
        assert_eq!(st.completed, 1);
        assert!(!st.cycle_in_flight);
    }

    #[tokio::test]
    async fn test_from_config_with_state_dir_uses_files() {
        let src = tree_with(&[("app.py", "x = eval(input())\n")]);
        let state = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::default();
        cfg.analyzer.root = src.path().to_path_buf();
        cfg.engine.state_dir = Some(state.path().to_path_buf());
        cfg.selector.use_fallback = false;

        let engine = EvolutionEngine::from_config(&cfg).unwrap();
        assert!(matches!(
            engine.run_cycle().await.unwrap(),
            CycleOutcome::Completed(_)
        ));
        assert!(state.path().join(COMPLETED_FILE).exists());
        assert!(state.path().join(HASHES_FILE).exists());
        assert!(state.path().join(LOG_FILE).exists());
    }
}
