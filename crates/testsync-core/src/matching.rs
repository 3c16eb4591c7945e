//! Identity matching of run tests against known store records.
//!
//! Titles are the primary key. Tag and file name only narrow the candidate
//! list when the title alone is not unique, so a test that moves directory
//! keeps its record as long as its title stays unique.

use std::collections::HashSet;

use testsync_state::{KnownRecord, RecordId};
use tracing::error;

use crate::flatten::TestRecord;

/// Result of matching one test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome<'a> {
    /// The record to reuse, if any
    pub record: Option<&'a KnownRecord>,
    /// Number of candidates left after every filter, when more than one
    pub ambiguous: Option<usize>,
}

/// Find the known record a test corresponds to.
///
/// `candidates` must already be restricted to the current namespace.
/// Records in `claimed` were matched earlier in this run and are skipped.
pub fn match_known<'a>(
    test: &TestRecord,
    candidates: &'a [KnownRecord],
    claimed: &HashSet<RecordId>,
) -> MatchOutcome<'a> {
    let mut pages: Vec<&KnownRecord> = candidates
        .iter()
        .filter(|r| r.properties.title == test.title)
        .collect();

    if pages.len() > 1 {
        pages.retain(|r| r.properties.tag == test.tag);
    }

    if pages.len() > 1 {
        pages.retain(|r| r.properties.file_name == test.file_name);
    }

    let ambiguous = (pages.len() > 1).then_some(pages.len());
    if let Some(count) = ambiguous {
        error!(
            file = %test.file_path,
            title = %test.title,
            count,
            "File has multiple tests with the same name; rename or remove the duplicates"
        );
    }

    MatchOutcome {
        record: pages.into_iter().find(|r| !claimed.contains(&r.id)),
        ambiguous,
    }
}
