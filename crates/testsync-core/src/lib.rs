//! testsync-core: run reconciliation for testsync
//!
//! Turns one test run into store writes and a list of failure locations.
//!
//! ## Layer 1 - Domain
//!
//! - `run`: run-results input model
//! - `flatten`: task tree to leaf tests, breadth-first
//! - `matching` / `reconcile`: identity matching and change classification
//! - `stacks`: bounded polling for failure frames, with fallbacks
//! - `summary` / `report`: store header refresh and Markdown rendering
//! - `sync`: the pipeline tying them together

pub mod config;
pub mod error;
pub mod flatten;
pub mod matching;
pub mod reconcile;
pub mod report;
pub mod run;
pub mod stacks;
pub mod summary;
pub mod sync;
pub mod telemetry;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use flatten::{failed_leaves, flatten_tests, strip_test_suffix, Leaf, TestRecord, ROOT_TAG};
pub use matching::{match_known, MatchOutcome};
pub use reconcile::{
    new_active, ChangeEntry, Changes, ReconcileOutcome, ReconcileStats, Reconciler,
};
pub use report::{code_snippet, has_new_results, render_markdown, strip_ansi};
pub use run::{FileRef, RunFile, RunResults, StackLocation, Task, TaskError, TaskResult};
pub use stacks::{
    FileIdentity, FrameSource, PollBudget, ReloadingFrames, SnapshotFrames, StackFrame,
    StackResolver,
};
pub use summary::{refresh_header, rewrite_counter, TrackedSummary};
pub use sync::{SyncPipeline, SyncReport};
pub use telemetry::init_tracing;

pub use testsync_state::{
    KnownRecord, RecordId, RecordPatch, StorageError, TestProperties, TestStatus, TestStore,
};
