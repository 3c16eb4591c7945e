//! Record schema shared by every store backend.
//!
//! A store row is a [`KnownRecord`]: the typed [`TestProperties`] the
//! reconciler owns, plus the fields people edit by hand (priority, assignees)
//! which the reconciler only reads.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TestStatus
// ---------------------------------------------------------------------------

/// Status of a test as stored in the external record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Todo,
    Only,
    Run,
    #[serde(other)]
    Unknown,
}

impl TestStatus {
    pub const ALL: [TestStatus; 7] = [
        TestStatus::Pass,
        TestStatus::Fail,
        TestStatus::Skip,
        TestStatus::Todo,
        TestStatus::Only,
        TestStatus::Run,
        TestStatus::Unknown,
    ];

    /// Parse a run state or mode (`"pass"`, `"skip"`, ...), case-insensitively.
    ///
    /// Anything unrecognised maps to [`TestStatus::Unknown`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PASS" => TestStatus::Pass,
            "FAIL" => TestStatus::Fail,
            "SKIP" => TestStatus::Skip,
            "TODO" => TestStatus::Todo,
            "ONLY" => TestStatus::Only,
            "RUN" => TestStatus::Run,
            _ => TestStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
            TestStatus::Todo => "TODO",
            TestStatus::Only => "ONLY",
            TestStatus::Run => "RUN",
            TestStatus::Unknown => "UNKNOWN",
        }
    }

    /// Only PASS and FAIL take part in pass/fail tracking.
    pub fn is_pass_or_fail(&self) -> bool {
        matches!(self, TestStatus::Pass | TestStatus::Fail)
    }

    /// Icon key (`<name>_<color>`) shown next to a record with this status.
    pub fn icon(&self) -> &'static str {
        match self {
            TestStatus::Pass => "checkmark_green",
            TestStatus::Fail => "clear_red",
            TestStatus::Skip => "playback-pause_blue",
            TestStatus::Todo => "code_pink",
            TestStatus::Only => "checkmark_blue",
            TestStatus::Run => "playback-play_gray",
            TestStatus::Unknown => "question-mark_yellow",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public URL of an icon key.
pub fn icon_url(icon: &str) -> String {
    format!("https://www.notion.so/icons/{icon}.svg")
}

/// Inverse of [`icon_url`]. Returns `None` for icons hosted elsewhere.
pub fn icon_from_url(url: &str) -> Option<String> {
    url.strip_prefix("https://www.notion.so/icons/")
        .and_then(|rest| rest.strip_suffix(".svg"))
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Stable identifier of a record in the external store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Generate a new random RecordId
    pub fn new() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A person a record is assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: String,
}

/// The property set the reconciler writes and compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestProperties {
    /// Display title (`describe > ... > it`)
    pub title: String,
    /// Namespace the record belongs to
    pub project: String,
    /// Directory prefix of the test file, or `root`
    pub tag: String,
    /// Base name of the test file
    pub file_name: String,
    /// Last reported status; absent on hand-made records
    pub status: Option<TestStatus>,
    pub archived: bool,
    pub active: bool,
    /// Icon key, see [`TestStatus::icon`]
    pub icon: Option<String>,
}

/// A record previously persisted in the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownRecord {
    pub id: RecordId,
    pub url: String,
    pub properties: TestProperties,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub assigned: Vec<PersonRef>,
    pub last_edited: DateTime<Utc>,
}

/// Partial update of a record's [`TestProperties`].
///
/// `None` fields are left untouched by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub title: Option<String>,
    pub project: Option<String>,
    pub tag: Option<String>,
    pub file_name: Option<String>,
    pub status: Option<TestStatus>,
    pub archived: Option<bool>,
    pub active: Option<bool>,
    pub icon: Option<String>,
}

impl RecordPatch {
    /// Patch that only flags the record as archived.
    pub fn archive() -> Self {
        RecordPatch {
            archived: Some(true),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    /// Apply the patch in place.
    pub fn apply(&self, props: &mut TestProperties) {
        if let Some(title) = &self.title {
            props.title = title.clone();
        }
        if let Some(project) = &self.project {
            props.project = project.clone();
        }
        if let Some(tag) = &self.tag {
            props.tag = tag.clone();
        }
        if let Some(file_name) = &self.file_name {
            props.file_name = file_name.clone();
        }
        if let Some(status) = self.status {
            props.status = Some(status);
        }
        if let Some(archived) = self.archived {
            props.archived = archived;
        }
        if let Some(active) = self.active {
            props.active = active;
        }
        if let Some(icon) = &self.icon {
            props.icon = Some(icon.clone());
        }
    }
}

impl From<&TestProperties> for RecordPatch {
    fn from(props: &TestProperties) -> Self {
        RecordPatch {
            title: Some(props.title.clone()),
            project: Some(props.project.clone()),
            tag: Some(props.tag.clone()),
            file_name: Some(props.file_name.clone()),
            status: props.status,
            archived: Some(props.archived),
            active: Some(props.active),
            icon: props.icon.clone(),
        }
    }
}

/// Title and icon of the store itself (the database header).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub title: String,
    pub icon: Option<String>,
}

/// Change to the store header. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderUpdate {
    /// Replacement for the first `N/M` counter of the title.
    pub counter: Option<String>,
    pub icon: Option<String>,
}

impl HeaderUpdate {
    /// Apply to a plain-text header.
    pub fn apply(&self, header: &mut StoreHeader) {
        if let Some(counter) = &self.counter {
            if let Some(title) = replace_counter(&header.title, counter) {
                header.title = title;
            }
        }
        if let Some(icon) = &self.icon {
            header.icon = Some(icon.clone());
        }
    }
}

fn counter_pattern() -> &'static Regex {
    static COUNTER: OnceLock<Regex> = OnceLock::new();
    COUNTER.get_or_init(|| Regex::new(r"[0-9]+/[0-9]+").expect("valid counter regex"))
}

/// Replace the first `N/M` counter in `text`. `None` when there is none.
pub fn replace_counter(text: &str, counter: &str) -> Option<String> {
    let re = counter_pattern();
    if !re.is_match(text) {
        return None;
    }
    Some(re.replace(text, regex::NoExpand(counter)).into_owned())
}
