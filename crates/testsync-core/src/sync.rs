//! End-to-end sync of one run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use testsync_state::TestStore;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::flatten::flatten_tests;
use crate::reconcile::{Changes, ReconcileStats, Reconciler};
use crate::report::has_new_results;
use crate::run::RunResults;
use crate::stacks::{FrameSource, StackFrame, StackResolver};
use crate::summary::{refresh_header, TrackedSummary};

/// Everything one sync produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub namespace: String,

    /// Number of leaf tests in the run.
    pub tests: usize,

    /// Changes recorded in the store, `None` when no store was used.
    pub changes: Option<Changes>,

    pub stats: Option<ReconcileStats>,

    pub summary: Option<TrackedSummary>,

    pub stacks: Vec<StackFrame>,

    pub has_new_results: bool,

    pub generated_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl SyncReport {
    /// Changes, or an empty map when no store was used.
    pub fn changes_or_empty(&self) -> Changes {
        self.changes.clone().unwrap_or_default()
    }
}

/// Sync orchestrator.
pub struct SyncPipeline;

impl SyncPipeline {
    /// Flatten the run, reconcile it into `store` (if any), refresh the store
    /// header, then resolve failure frames.
    ///
    /// Store failures abort the sync; stack resolution never does.
    pub async fn run(
        store: Option<Arc<dyn TestStore>>,
        frames: Arc<dyn FrameSource>,
        config: &SyncConfig,
        run: &RunResults,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        config.validate()?;

        let tests = flatten_tests(&run.files);
        info!(
            namespace = %config.namespace,
            files = run.files.len(),
            tests = tests.len(),
            "Flattened run"
        );

        let (changes, stats, summary) = match &store {
            Some(store) => {
                let outcome = Reconciler::new(store.clone(), config.namespace.clone())
                    .reconcile(&tests)
                    .await?;
                let summary = refresh_header(store.as_ref()).await?;
                (Some(outcome.changes), Some(outcome.stats), Some(summary))
            }
            None => {
                info!("No store configured, skipping reconciliation");
                (None, None, None)
            }
        };

        let mut resolver = StackResolver::new(frames, config.poll_budget());
        let stacks = resolver.resolve(&run.files).await;
        info!(frames = stacks.len(), "Resolved failure stacks");

        let has_new_results = has_new_results(changes.as_ref(), &run.files);

        Ok(SyncReport {
            namespace: config.namespace.clone(),
            tests: tests.len(),
            changes,
            stats,
            summary,
            stacks,
            has_new_results,
            generated_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
