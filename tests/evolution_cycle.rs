//! # Evolution Cycle Integration Tests
//!
//! ## Responsibility
//! Drive the engine end to end over a temporary source tree: scan, select,
//! lifecycle, publish, and the bookkeeping that makes a second cycle skip
//! finished work. Also covers restarts over file-backed state, publishing
//! into a real git repository, and the background scheduler.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use evolution_engine::config::{EngineConfig, ENV_INTERVAL_SECS, ENV_SCHEDULER_ENABLED};
use evolution_engine::evolve::engine::{COMPLETED_FILE, HASHES_FILE, LOG_FILE};
use evolution_engine::evolve::lifecycle::LifecycleState;
use evolution_engine::evolve::scope::PriorityLevel;
use evolution_engine::evolve::{
    CycleOutcome, CycleStatus, DryRunPublisher, EvolutionEngine, FileIdStore, GitPublisher,
    GitPublisherConfig, IdStore, ImprovementSelector, JsonlLog, MemoryIdStore, PersistenceLog,
    ReportArchive,
};

fn write(root: &Path, name: &str, body: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

// ── Single tree, in-memory state ──────────────────────────────────────────

#[tokio::test]
async fn test_eval_finding_completes_then_evolution_is_complete() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "def run(expr):\n    return eval(expr)\n");

    let publisher = Arc::new(DryRunPublisher::default());
    let engine = EvolutionEngine::builder(src.path())
        .selector(ImprovementSelector::findings_only())
        .publisher(publisher.clone())
        .build()
        .unwrap();

    let first = engine.run_cycle().await.unwrap();
    let report = match &first {
        CycleOutcome::Completed(r) => r,
        other => panic!("expected completed, got {}", other.label()),
    };
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.final_state(), LifecycleState::Completed);
    assert_eq!(
        report.scope.as_ref().unwrap().priority_level,
        PriorityLevel::Critical
    );
    assert!(report.overall_success_score > 0.0 && report.overall_success_score <= 10.0);
    assert_eq!(report.transitions.first().unwrap().from, LifecycleState::Scoping);
    assert!(engine
        .completed_store()
        .contains(&report.improvement.id));
    assert_eq!(publisher.commits().len(), 1);

    let second = engine.run_cycle().await.unwrap();
    assert!(matches!(second, CycleOutcome::EvolutionComplete));
    assert_eq!(publisher.commits().len(), 1);
    assert_eq!(engine.status().completed_ids, 1);
}

#[tokio::test]
async fn test_findings_are_worked_in_priority_order() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "a.py", "def log():\n    print('x')\n");
    write(src.path(), "b.py", "import time\ntime.sleep(5)\n");
    write(src.path(), "c.py", "value = eval('1 + 1')\n");

    let engine = EvolutionEngine::builder(src.path())
        .selector(ImprovementSelector::findings_only())
        .build()
        .unwrap();

    let mut kinds = Vec::new();
    loop {
        match engine.run_cycle().await.unwrap() {
            CycleOutcome::EvolutionComplete => break,
            outcome => kinds.push(outcome.report().unwrap().improvement.kind.label()),
        }
        assert!(kinds.len() <= 3, "cycle repeated finished work");
    }
    assert_eq!(kinds, vec!["security", "performance", "style"]);
}

#[tokio::test]
async fn test_archive_writes_json_and_markdown_per_cycle() {
    let src = tempfile::tempdir().unwrap();
    let reports = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");

    let engine = EvolutionEngine::builder(src.path())
        .selector(ImprovementSelector::findings_only())
        .archive(ReportArchive::new(reports.path()))
        .build()
        .unwrap();
    engine.run_cycle().await.unwrap();

    let mut exts: Vec<String> = std::fs::read_dir(reports.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.path()
                .extension()
                .map(|x| x.to_string_lossy().into_owned())
        })
        .collect();
    exts.sort();
    assert_eq!(exts, vec!["json", "md"]);
}

// ── File-backed state across restarts ─────────────────────────────────────

#[tokio::test]
async fn test_restart_with_state_dir_does_not_repeat_work() {
    let src = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");

    let mut cfg = EngineConfig::default();
    cfg.analyzer.root = src.path().to_path_buf();
    cfg.engine.state_dir = Some(state.path().to_path_buf());
    cfg.selector.use_fallback = false;

    {
        let engine = EvolutionEngine::from_config(&cfg).unwrap();
        assert!(matches!(
            engine.run_cycle().await.unwrap(),
            CycleOutcome::Completed(_)
        ));
    }

    let engine = EvolutionEngine::from_config(&cfg).unwrap();
    assert!(matches!(
        engine.run_cycle().await.unwrap(),
        CycleOutcome::EvolutionComplete
    ));
    let st = engine.status();
    assert_eq!(st.completed_ids, 1);
    assert_eq!(st.seen_hashes, 2);

    let completed = FileIdStore::open(state.path().join(COMPLETED_FILE)).unwrap();
    assert_eq!(completed.len(), 1);
    let hashes = FileIdStore::open(state.path().join(HASHES_FILE)).unwrap();
    assert_eq!(hashes.len(), 2);

    let log = JsonlLog::open(state.path().join(LOG_FILE)).unwrap();
    let records = log.list_recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert!(records[0].commit_id.is_some());
}

// ── Scheduler ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scheduler_stops_when_complete() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");
    write(src.path(), "job.py", "import time\ntime.sleep(1)\n");

    let engine = Arc::new(
        EvolutionEngine::builder(src.path())
            .selector(ImprovementSelector::findings_only())
            .build()
            .unwrap(),
    );
    let handle = engine.clone().spawn(Duration::from_millis(10), true);

    tokio::time::timeout(Duration::from_secs(10), handle.join())
        .await
        .expect("scheduler should exit once nothing is left");
    let st = engine.status();
    assert_eq!(st.completed, 2);
    assert_eq!(st.last_outcome.as_deref(), Some("evolution_complete"));
}

#[tokio::test]
async fn test_scheduler_shutdown_signal() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "clean.py", "def ok():\n    return 1\n");

    let engine = Arc::new(EvolutionEngine::builder(src.path()).build().unwrap());
    let handle = engine.clone().spawn(Duration::from_secs(3600), false);

    // The first tick fires immediately; give it a moment, then stop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    tokio::time::timeout(Duration::from_secs(10), handle.shutdown())
        .await
        .expect("shutdown should complete");
    assert!(!engine.status().cycle_in_flight);
}

// ── Scheduler toggle ──────────────────────────────────────────────────────

fn eval_config(root: &Path) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.analyzer.root = root.to_path_buf();
    cfg.selector.use_fallback = false;
    cfg
}

#[tokio::test]
async fn test_disabled_scheduler_starts_nothing() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");
    let cfg = eval_config(src.path());
    assert!(!cfg.scheduler.enabled);

    let engine = Arc::new(EvolutionEngine::from_config(&cfg).unwrap());
    assert!(engine.clone().spawn_configured(&cfg.scheduler).is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.status().cycles_run, 0);
    assert_eq!(engine.status().completed_ids, 0);
}

#[tokio::test]
async fn test_scheduler_enabled_by_override_runs_until_complete() {
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");
    let mut cfg = eval_config(src.path());
    let vars: HashMap<String, String> = [
        (ENV_SCHEDULER_ENABLED.to_string(), "yes".to_string()),
        (ENV_INTERVAL_SECS.to_string(), "1".to_string()),
    ]
    .into_iter()
    .collect();
    cfg.apply_overrides(&vars).unwrap();

    let engine = Arc::new(EvolutionEngine::from_config(&cfg).unwrap());
    let handle = engine
        .clone()
        .spawn_configured(&cfg.scheduler)
        .expect("override enables the scheduler");
    tokio::time::timeout(Duration::from_secs(10), handle.join())
        .await
        .expect("scheduler should exit once nothing is left");

    let st = engine.status();
    assert_eq!(st.completed, 1);
    assert_eq!(st.last_outcome.as_deref(), Some("evolution_complete"));
}

// ── Real git repository ───────────────────────────────────────────────────

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

#[tokio::test]
async fn test_git_push_failure_then_retry_completes_with_one_commit() {
    let repo = tempfile::tempdir().unwrap();
    let ready = git(repo.path(), &["init", "-q"])
        .and_then(|_| git(repo.path(), &["config", "user.email", "engine@example.com"]))
        .and_then(|_| git(repo.path(), &["config", "user.name", "Evolution Engine"]))
        .and_then(|_| git(repo.path(), &["config", "commit.gpgsign", "false"]));
    if ready.is_none() {
        return;
    }
    let src = tempfile::tempdir().unwrap();
    write(src.path(), "app.py", "x = eval(input())\n");

    let completed = Arc::new(MemoryIdStore::new());
    let hashes = Arc::new(MemoryIdStore::new());
    let engine_with = |push: bool| {
        EvolutionEngine::builder(src.path())
            .selector(ImprovementSelector::findings_only())
            .completed_store(completed.clone())
            .hash_store(hashes.clone())
            .publisher(Arc::new(GitPublisher::new(GitPublisherConfig {
                repo_path: repo.path().to_path_buf(),
                remote: "nosuchremote".to_string(),
                push,
                ..GitPublisherConfig::default()
            })))
            .build()
            .unwrap()
    };

    // Commit lands, push fails: nothing is recorded.
    let first = engine_with(true).run_cycle().await.unwrap();
    assert!(matches!(first, CycleOutcome::Failed(_)));
    assert!(completed.is_empty());
    assert!(hashes.is_empty());
    let head = git(repo.path(), &["rev-parse", "HEAD"]).unwrap();

    // Same artifacts again: the existing commit is reused.
    let second = engine_with(false).run_cycle().await.unwrap();
    let report = match second {
        CycleOutcome::Completed(r) => r,
        other => panic!("expected completed, got {}", other.label()),
    };
    assert_eq!(report.commit_id.as_deref(), Some(head.as_str()));
    assert_eq!(
        git(repo.path(), &["rev-list", "--count", "HEAD"]).as_deref(),
        Some("1")
    );
    assert_eq!(completed.len(), 1);
    assert_eq!(hashes.len(), 2);
}
