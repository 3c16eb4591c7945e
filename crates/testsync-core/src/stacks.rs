//! Failure stack resolution.
//!
//! The runner attaches parsed stack frames to an error some time after the
//! error itself is reported, so frames may still be missing when the sync
//! starts. The resolver polls a [`FrameSource`] under a run-scoped
//! [`PollBudget`], then degrades to a structural search of the task and a
//! regex over the raw stack text. It never fails; the worst case is a frame
//! without a location.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::flatten::failed_leaves;
use crate::run::{RunFile, RunResults, StackLocation, Task, TaskError};

/// Default number of waits before giving up on frames.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;
/// Default pause between two polls.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(1000);

/// File a failure belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    pub diff: Option<String>,
}

/// One resolved failure location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Task id
    pub id: String,
    pub file: FileIdentity,
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// `[file name, describe..., test]`
    pub path: Vec<String>,
    pub error: ErrorDetail,
}

impl StackFrame {
    pub fn has_location(&self) -> bool {
        self.line.is_some()
    }

    /// `name:line:column`, with `?` for unknown parts.
    pub fn location(&self) -> String {
        let fmt = |v: Option<u32>| v.map_or_else(|| "?".to_string(), |v| v.to_string());
        format!("{}:{}:{}", self.file.name, fmt(self.line), fmt(self.column))
    }
}

/// Retry budget shared by every resolution of one run.
///
/// Once spent, later resolutions check once and do not wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBudget {
    max_attempts: u32,
    used: u32,
    delay: Duration,
}

impl PollBudget {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            used: 0,
            delay,
        }
    }

    /// Consume one wait. Returns `false` once the budget is exhausted.
    pub fn take(&mut self) -> bool {
        if self.used >= self.max_attempts {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max_attempts
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for PollBudget {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_DELAY)
    }
}

/// Where the resolver reads the current frame list of an error from.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Frames currently attached to error `error_index` of task `task_id`.
    async fn frames(&self, task_id: &str, error_index: usize) -> Vec<StackLocation>;
}

fn error_frames(task: &Task) -> Vec<Vec<StackLocation>> {
    task.errors()
        .iter()
        .map(|e| e.stacks.clone().unwrap_or_default())
        .collect()
}

/// Frames exactly as loaded; never changes between polls.
#[derive(Debug, Default)]
pub struct SnapshotFrames {
    by_task: HashMap<String, Vec<Vec<StackLocation>>>,
}

impl SnapshotFrames {
    pub fn new(files: &[RunFile]) -> Self {
        let by_task = failed_leaves(files)
            .into_iter()
            .map(|leaf| (leaf.task.id.clone(), error_frames(leaf.task)))
            .collect();
        Self { by_task }
    }
}

#[async_trait]
impl FrameSource for SnapshotFrames {
    async fn frames(&self, task_id: &str, error_index: usize) -> Vec<StackLocation> {
        self.by_task
            .get(task_id)
            .and_then(|errors| errors.get(error_index))
            .cloned()
            .unwrap_or_default()
    }
}

/// Re-reads the run-results file on every poll, picking up frames the runner
/// wrote after the sync started.
#[derive(Debug, Clone)]
pub struct ReloadingFrames {
    path: PathBuf,
}

impl ReloadingFrames {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FrameSource for ReloadingFrames {
    async fn frames(&self, task_id: &str, error_index: usize) -> Vec<StackLocation> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not reload run results");
                return Vec::new();
            }
        };
        let run = match RunResults::from_json(&raw) {
            Ok(run) => run,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not parse run results");
                return Vec::new();
            }
        };
        run.find_task(task_id)
            .and_then(|task| task.errors().get(error_index))
            .and_then(|error| error.stacks.clone())
            .unwrap_or_default()
    }
}

/// Depth-first search of a task for any object shaped `{ file, line, column }`.
///
/// Only error `error_index` of the task's result is searched; the other
/// errors carry locations of their own.
pub fn locate_in_task(task: &Task, error_index: usize) -> Option<(u32, u32)> {
    let mut root = serde_json::to_value(task).ok()?;
    if let Some(errors) = root
        .pointer_mut("/result/errors")
        .and_then(Value::as_array_mut)
    {
        let own = errors.get(error_index).cloned();
        errors.clear();
        errors.extend(own);
    }

    let mut stack = vec![&root];
    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                let coord = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_u64)
                        .and_then(|v| u32::try_from(v).ok())
                };
                if let (true, Some(line), Some(column)) =
                    (map.contains_key("file"), coord("line"), coord("column"))
                {
                    return Some((line, column));
                }
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }
    None
}

/// First `<file>:<line>:<column>` in a raw stack trace.
pub fn locate_in_trace(trace: &str, file: &str) -> Option<(u32, u32)> {
    if file.is_empty() {
        return None;
    }
    let re = Regex::new(&format!(r"{}:(\d+):(\d+)", regex::escape(file))).ok()?;
    let caps = re.captures(trace)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Resolves failure frames for one run.
pub struct StackResolver {
    source: Arc<dyn FrameSource>,
    budget: PollBudget,
}

impl StackResolver {
    pub fn new(source: Arc<dyn FrameSource>, budget: PollBudget) -> Self {
        Self { source, budget }
    }

    pub fn budget(&self) -> &PollBudget {
        &self.budget
    }

    /// One [`StackFrame`] per frame of every error on every failed leaf.
    pub async fn resolve(&mut self, files: &[RunFile]) -> Vec<StackFrame> {
        let mut frames = Vec::new();

        for leaf in failed_leaves(files) {
            let file = leaf
                .task
                .file
                .as_ref()
                .map(|f| FileIdentity {
                    id: f.id.clone(),
                    name: f.name.clone(),
                    path: f.filepath.clone(),
                })
                .unwrap_or_default();

            for (index, error) in leaf.task.errors().iter().enumerate() {
                let base = StackFrame {
                    id: leaf.task.id.clone(),
                    file: file.clone(),
                    line: None,
                    column: None,
                    path: leaf.path.clone(),
                    error: ErrorDetail {
                        name: error.name.clone(),
                        message: error.message.clone(),
                        diff: error.diff.clone(),
                    },
                };
                self.resolve_error(leaf.task, index, error, base, &mut frames)
                    .await;
            }
        }

        frames
    }

    async fn resolve_error(
        &mut self,
        task: &Task,
        index: usize,
        error: &TaskError,
        base: StackFrame,
        out: &mut Vec<StackFrame>,
    ) {
        let polled = self.poll(&task.id, index).await;
        if !polled.is_empty() {
            out.extend(polled.into_iter().map(|loc| StackFrame {
                line: Some(loc.line),
                column: Some(loc.column),
                ..base.clone()
            }));
            return;
        }

        info!(task = %task.name, "No stacks available for task");

        let fallback = locate_in_task(task, index).or_else(|| {
            let trace = error.stack.as_deref()?;
            locate_in_trace(trace, &base.file.name)
                .or_else(|| locate_in_trace(trace, &base.file.path))
        });

        match fallback {
            Some((line, column)) => out.push(StackFrame {
                line: Some(line),
                column: Some(column),
                ..base
            }),
            None => {
                warn!(task = %task.name, "Reporting failure without a location");
                out.push(base);
            }
        }
    }

    async fn poll(&mut self, task_id: &str, index: usize) -> Vec<StackLocation> {
        loop {
            let frames = self.source.frames(task_id, index).await;
            if !frames.is_empty() || !self.budget.take() {
                return frames;
            }
            debug!(
                attempt = self.budget.used(),
                max = self.budget.max_attempts(),
                "Waiting for stacks to be available"
            );
            tokio::time::sleep(self.budget.delay()).await;
        }
    }
}
