//! Tree flattening: run task tree → flat leaf lists.
//!
//! Traversal is breadth-first over an index-based work queue. The queue is a
//! plain `Vec` used as an arena: entries are appended at the tail and read
//! through a moving head index, so encounter order stays explicit and nothing
//! recurses on the call stack.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use testsync_state::TestStatus;

use crate::run::{RunFile, Task};

/// Tag of tests whose file sits at the project root.
pub const ROOT_TAG: &str = "root";

/// A leaf test of the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    /// Task id, stable within one run only
    pub id: String,
    /// `[file, describe..., test]`, always at least two segments
    pub path: Vec<String>,
    /// `path[1..]` joined with ` > `
    pub title: String,
    /// First path segment, e.g. `components/Button`
    pub file: String,
    /// Base name of `file`, e.g. `Button`
    pub file_name: String,
    /// Directory of `file`, or [`ROOT_TAG`]
    pub tag: String,
    /// File name as reported by the run, e.g. `components/Button.test.tsx`
    pub file_path: String,
    pub status: TestStatus,
}

impl TestRecord {
    fn from_leaf(task: &Task, path: Vec<String>, file_path: &str) -> Self {
        let file = path[0].clone();
        let (tag, file_name) = match file.rsplit_once('/') {
            Some((dir, base)) if !dir.is_empty() => (dir.to_string(), base.to_string()),
            Some((_, base)) => (ROOT_TAG.to_string(), base.to_string()),
            None => (ROOT_TAG.to_string(), file.clone()),
        };

        TestRecord {
            id: task.id.clone(),
            title: path[1..].join(" > "),
            file,
            file_name,
            tag,
            file_path: file_path.to_string(),
            status: leaf_status(task),
            path,
        }
    }
}

/// Result state if the task ran, its declared mode otherwise.
pub fn leaf_status(task: &Task) -> TestStatus {
    task.result
        .as_ref()
        .and_then(|r| r.state.as_deref())
        .or(task.mode.as_deref())
        .map(TestStatus::parse)
        .unwrap_or(TestStatus::Unknown)
}

/// Strip a `.test.<ext>` / `.spec.<ext>` suffix from a test file name.
pub fn strip_test_suffix(file_name: &str) -> String {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    let re = SUFFIX.get_or_init(|| {
        Regex::new(r"\.(?:test|spec)\.(?:[cm]?[jt]sx?)$").expect("valid suffix regex")
    });
    re.replace(file_name, "").into_owned()
}

/// A leaf reached by the walker, with its root-to-leaf path.
#[derive(Debug, Clone)]
pub struct Leaf<'a> {
    pub task: &'a Task,
    pub path: Vec<String>,
    /// Index of the owning file in the input slice
    pub file_index: usize,
}

struct Pending<'a> {
    task: &'a Task,
    path: Vec<String>,
    file_index: usize,
}

/// Breadth-first walk emitting leaves in encounter order.
fn walk<'a>(seeds: Vec<Pending<'a>>) -> Vec<Leaf<'a>> {
    let mut queue = seeds;
    let mut head = 0;
    let mut leaves = Vec::new();

    while head < queue.len() {
        let task = queue[head].task;
        let file_index = queue[head].file_index;
        let path = std::mem::take(&mut queue[head].path);
        head += 1;

        match &task.tasks {
            Some(children) => {
                for child in children {
                    let mut child_path = path.clone();
                    child_path.push(child.name.clone());
                    queue.push(Pending {
                        task: child,
                        path: child_path,
                        file_index,
                    });
                }
            }
            None => leaves.push(Leaf {
                task,
                path,
                file_index,
            }),
        }
    }

    leaves
}

fn seed<'a>(
    files: impl Iterator<Item = (usize, &'a RunFile)>,
    root_segment: impl Fn(&RunFile) -> String,
) -> Vec<Pending<'a>> {
    let mut seeds = Vec::new();
    for (file_index, file) in files {
        let root = root_segment(file);
        for task in &file.tasks {
            seeds.push(Pending {
                task,
                path: vec![root.clone(), task.name.clone()],
                file_index,
            });
        }
    }
    seeds
}

/// Every leaf test of the run, in breadth-first order, as [`TestRecord`]s.
pub fn flatten_tests(files: &[RunFile]) -> Vec<TestRecord> {
    let seeds = seed(files.iter().enumerate(), |f| strip_test_suffix(&f.name));
    walk(seeds)
        .into_iter()
        .map(|leaf| TestRecord::from_leaf(leaf.task, leaf.path, &files[leaf.file_index].name))
        .collect()
}

/// Leaves of failed files only. Paths start with the unstripped file name.
pub fn failed_leaves(files: &[RunFile]) -> Vec<Leaf<'_>> {
    let seeds = seed(
        files.iter().enumerate().filter(|(_, f)| f.failed()),
        |f| f.name.clone(),
    );
    walk(seeds)
}
