//! Tracked-test summary and store header refresh.

use serde::{Deserialize, Serialize};
use testsync_state::{replace_counter, HeaderUpdate, TestStatus, TestStore};
use tracing::info;

use crate::error::Result;

pub const ICON_ALL_PASSING: &str = "checklist_green";
pub const ICON_SOME_FAILING: &str = "list_red";

/// Pass count over every tracked (active, unarchived) record of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedSummary {
    pub passing: usize,
    pub total: usize,
}

impl TrackedSummary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = Option<TestStatus>>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            summary.total += 1;
            if status == Some(TestStatus::Pass) {
                summary.passing += 1;
            }
        }
        summary
    }

    /// An empty store counts as all passing.
    pub fn all_passing(&self) -> bool {
        self.passing == self.total
    }

    /// `passing/total`
    pub fn counter(&self) -> String {
        format!("{}/{}", self.passing, self.total)
    }

    pub fn icon(&self) -> &'static str {
        if self.all_passing() {
            ICON_ALL_PASSING
        } else {
            ICON_SOME_FAILING
        }
    }
}

/// Replace the first `N/M` counter in `title`. `None` when there is none.
pub fn rewrite_counter(title: &str, summary: TrackedSummary) -> Option<String> {
    replace_counter(title, &summary.counter())
}

/// Recount tracked records and update the store header to match.
///
/// The icon is always rewritten. The title is only touched when it carries a
/// counter, and then only the counter itself changes.
pub async fn refresh_header(store: &dyn TestStore) -> Result<TrackedSummary> {
    let tracked = store.tracked().await?;
    let summary = TrackedSummary::from_statuses(tracked.iter().map(|r| r.properties.status));

    let current = store.header().await?;
    let counter = rewrite_counter(&current.title, summary).map(|_| summary.counter());

    info!(
        counter = counter.as_deref().unwrap_or("-"),
        icon = summary.icon(),
        passing = summary.passing,
        total = summary.total,
        "Updating store header"
    );
    store
        .update_header(&HeaderUpdate {
            counter,
            icon: Some(summary.icon().to_string()),
        })
        .await?;

    Ok(summary)
}
