//! Change classification and store reconciliation.
//!
//! Walks the flattened tests in order, matches each one against the records
//! of the namespace, and issues the minimal set of store writes: create for
//! unknown tests, update for changed ones, archive for records no test
//! claimed. Writes are strictly sequential; first match wins.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use testsync_state::{
    KnownRecord, PersonRef, RecordId, RecordPatch, TestProperties, TestStatus, TestStore,
};
use tracing::info;

use crate::error::Result;
use crate::flatten::TestRecord;
use crate::matching::match_known;

/// A user-visible change produced by one run, keyed by task id in [`Changes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Task id
    pub id: String,
    pub path: Vec<String>,
    pub status: TestStatus,
    pub page_id: RecordId,
    pub page_url: String,
    pub priority: Option<String>,
    pub assigned: Vec<PersonRef>,
    pub active: bool,
    pub is_new_test: bool,
}

/// Task id → change.
pub type Changes = BTreeMap<String, ChangeEntry>;

/// Per-run write statistics. Lists hold record URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub kept: usize,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub archived: Vec<String>,
}

impl ReconcileStats {
    /// Number of store writes the run issued.
    pub fn writes(&self) -> usize {
        self.created.len() + self.updated.len() + self.archived.len()
    }
}

impl std::fmt::Display for ReconcileStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  {} kept", self.kept)?;
        for (label, urls) in [
            ("created", &self.created),
            ("updated", &self.updated),
            ("archived", &self.archived),
        ] {
            writeln!(f, "  {} {}", urls.len(), label)?;
            for url in urls {
                writeln!(f, "    - {url}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub changes: Changes,
    pub stats: ReconcileStats,
}

/// Active flag a record should carry after this run.
///
/// Leaving PASS/FAIL deactivates; entering PASS/FAIL from anything else (or
/// from nothing) activates; moving between PASS and FAIL keeps the flag.
pub fn new_active(
    new_status: TestStatus,
    old_status: Option<TestStatus>,
    old_active: Option<bool>,
) -> bool {
    if !new_status.is_pass_or_fail() {
        return false;
    }
    match old_status {
        Some(old) if old.is_pass_or_fail() => old_active.unwrap_or(false),
        _ => true,
    }
}

fn change_entry(
    test: &TestRecord,
    record: &KnownRecord,
    new_active: bool,
    is_new_test: bool,
) -> ChangeEntry {
    ChangeEntry {
        id: test.id.clone(),
        path: test.path.clone(),
        status: test.status,
        page_id: record.id.clone(),
        page_url: record.url.clone(),
        priority: record.priority.clone(),
        assigned: record.assigned.clone(),
        active: record.properties.active || new_active,
        is_new_test,
    }
}

/// Reconciles one run's tests against the records of one namespace.
pub struct Reconciler {
    store: Arc<dyn TestStore>,
    namespace: String,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TestStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    fn prospective(&self, test: &TestRecord, active: bool) -> TestProperties {
        TestProperties {
            title: test.title.clone(),
            project: self.namespace.clone(),
            tag: test.tag.clone(),
            file_name: test.file_name.clone(),
            status: Some(test.status),
            archived: false,
            active,
            icon: Some(test.status.icon().to_string()),
        }
    }

    /// Sync `tests` into the store and return the changes worth reporting.
    pub async fn reconcile(&self, tests: &[TestRecord]) -> Result<ReconcileOutcome> {
        let candidates = self.store.query(&self.namespace).await?;
        info!(
            namespace = %self.namespace,
            tests = tests.len(),
            known = candidates.len(),
            "Reconciling test records"
        );

        let mut claimed: HashSet<RecordId> = HashSet::new();
        let mut outcome = ReconcileOutcome::default();

        for test in tests {
            let matched = match_known(test, &candidates, &claimed).record;

            let Some(page) = matched else {
                let active = new_active(test.status, None, None);
                info!(title = %test.title, "Creating record");
                let created = self.store.create(&self.prospective(test, active)).await?;

                outcome
                    .changes
                    .insert(test.id.clone(), change_entry(test, &created, active, true));
                claimed.insert(created.id.clone());
                outcome.stats.created.push(created.url);
                continue;
            };

            claimed.insert(page.id.clone());

            let active = new_active(
                test.status,
                page.properties.status,
                Some(page.properties.active),
            );
            let props = self.prospective(test, active);

            if page.properties == props {
                outcome.stats.kept += 1;
                continue;
            }

            info!(title = %test.title, "Updating record");
            self.store.update(&page.id, &RecordPatch::from(&props)).await?;
            outcome.stats.updated.push(page.url.clone());

            let change = change_entry(test, page, active, false);
            if change.active {
                outcome.changes.insert(test.id.clone(), change);
            }
        }

        for page in &candidates {
            if claimed.contains(&page.id) || page.properties.archived {
                continue;
            }
            info!(title = %page.properties.title, "Archiving record");
            self.store.update(&page.id, &RecordPatch::archive()).await?;
            outcome.stats.archived.push(page.url.clone());
        }

        info!("Store updated:\n{}", outcome.stats);
        Ok(outcome)
    }
}
