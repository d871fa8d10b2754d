//! # Evolution
//!
//! The improvement loop: [`analyzer`] finds opportunities, [`selector`] picks
//! the next one, [`scope`] and [`lifecycle`] turn it into artifacts and
//! scores, [`guard`] keeps repeats and junk out, [`publisher`] commits, and
//! [`engine`] ties a cycle together and records what it did through
//! [`persistence`] and [`report`].
//!
//! ```text
//! scan ─► select ─► SCOPING ─► IMPLEMENTING ─► ANALYZING ─► INTEGRATING ─► ASSESSING
//!                                   │ guard                                    │
//!                                   ▼                                          ▼
//!                              SpamRejected                      publish ─► record ids + hashes
//! ```

pub mod analyzer;
pub mod engine;
pub mod guard;
pub mod lifecycle;
pub mod persistence;
pub mod publisher;
pub mod report;
pub mod scope;
pub mod selector;
pub mod store;

pub use analyzer::{AnalyzerConfig, CodeAnalyzer, Finding, FindingKind, ScanStats, Severity};
pub use engine::{CycleOutcome, EngineBuilder, EngineStatus, EvolutionEngine, SchedulerHandle};
pub use guard::{Admission, ContentGuard, GuardConfig, GuardStats, SpamRejected};
pub use lifecycle::{
    CycleReport, CycleStatus, ImplementationLifecycle, LifecycleError, LifecyclePhases,
    LifecycleState, StandardPhases,
};
pub use persistence::{JsonlLog, LogRecord, MemoryLog, PersistenceLog};
pub use publisher::{CommitId, DryRunPublisher, GitPublisher, GitPublisherConfig, Publisher};
pub use report::ReportArchive;
pub use scope::{Scope, ScopeBuilder};
pub use selector::{Improvement, ImprovementSelector};
pub use store::{FileIdStore, IdStore, MemoryIdStore};
