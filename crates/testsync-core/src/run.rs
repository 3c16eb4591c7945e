//! Run-results input model.
//!
//! Mirrors the JSON a test runner dumps when a run finishes: an ordered list
//! of files, each holding a recursive task tree. Fields the reconciler does
//! not read are kept in `extra` so the structural stack search can still see
//! them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// One test file of a run (the top-level result group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    #[serde(default)]
    pub id: String,
    /// Path of the file relative to the project root
    pub name: String,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl RunFile {
    pub fn failed(&self) -> bool {
        self.result
            .as_ref()
            .and_then(|r| r.state.as_deref())
            .is_some_and(|s| s.eq_ignore_ascii_case("fail"))
    }
}

/// A node of the task tree: a suite when `tasks` is present, a test otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Declared mode (`run`, `skip`, `only`, `todo`)
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn is_group(&self) -> bool {
        self.tasks.is_some()
    }

    pub fn errors(&self) -> &[TaskError] {
        self.result
            .as_ref()
            .map(|r| r.errors.as_slice())
            .unwrap_or_default()
    }
}

/// Reference from a task back to its file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filepath: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub errors: Vec<TaskError>,
}

/// An error attached to a failed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub diff: Option<String>,
    /// Parsed stack frames; filled in asynchronously by the runner
    #[serde(default)]
    pub stacks: Option<Vec<StackLocation>>,
    /// Raw textual stack trace
    #[serde(default)]
    pub stack: Option<String>,
}

/// One parsed stack location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackLocation {
    #[serde(default)]
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RunDocument {
    Files(Vec<RunFile>),
    Wrapped { files: Vec<RunFile> },
}

/// A parsed run-results document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResults {
    pub files: Vec<RunFile>,
}

impl RunResults {
    /// Parse either a bare `[file, ...]` array or `{ "files": [...] }`.
    pub fn from_json(raw: &str) -> Result<Self> {
        let files = match serde_json::from_str(raw)? {
            RunDocument::Files(files) => files,
            RunDocument::Wrapped { files } => files,
        };
        Ok(RunResults { files })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn any_failed(&self) -> bool {
        self.files.iter().any(RunFile::failed)
    }

    /// Depth-first lookup of a task by id.
    pub fn find_task(&self, id: &str) -> Option<&Task> {
        let mut stack: Vec<&Task> = self.files.iter().flat_map(|f| f.tasks.iter()).collect();
        while let Some(task) = stack.pop() {
            if task.id == id {
                return Some(task);
            }
            if let Some(children) = &task.tasks {
                stack.extend(children.iter());
            }
        }
        None
    }
}
