//! Markdown rendering of a run's changes and failure frames.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::reconcile::Changes;
use crate::run::RunFile;
use crate::stacks::StackFrame;

/// Lines shown on each side of a failing line.
pub const DEFAULT_SNIPPET_CONTEXT: usize = 3;

/// Numbered source lines around `line` (1-based) with a caret under `column`.
pub fn code_snippet(source: &str, line: usize, column: usize, context: usize) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let start = line.saturating_sub(context);
    let end = lines.len().min(line + context);

    let mut out = Vec::new();
    for (offset, text) in lines.iter().enumerate().take(end).skip(start) {
        let number = offset + 1;
        let mut row = format!("  {number} | {text}");
        if number == line {
            row.push('\n');
            row.push_str(&" ".repeat(column + 5));
            row.push('^');
        }
        out.push(row);
    }
    out.join("\n")
}

/// [`code_snippet`] over a file on disk. `None` when it cannot be read.
pub fn read_snippet(path: &Path, line: usize, column: usize, context: usize) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(source) => Some(code_snippet(&source, line, column, context)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read source for snippet");
            None
        }
    }
}

/// Remove SGR colour escapes such as `\x1b[32m`.
pub fn strip_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1B\[\d+m").expect("valid ansi regex"));
    re.replace_all(text, "").into_owned()
}

/// Whether a run produced anything worth reporting.
///
/// With a store, that means recorded changes; without one, any failed file.
pub fn has_new_results(changes: Option<&Changes>, files: &[RunFile]) -> bool {
    match changes {
        Some(changes) => !changes.is_empty(),
        None => files.iter().any(RunFile::failed),
    }
}

fn quoted_path(path: &[String]) -> String {
    path.iter()
        .map(|p| format!("`{p}`"))
        .collect::<Vec<_>>()
        .join("\n  > ")
}

/// Render the report for one namespace.
///
/// Frames are included only when their task has a change; changes without
/// any frame are listed by status afterwards. `snippet` supplies source
/// excerpts for located frames.
pub fn render_markdown<F>(
    namespace: &str,
    stacks: &[StackFrame],
    changes: &Changes,
    snippet: F,
) -> String
where
    F: Fn(&StackFrame) -> Option<String>,
{
    let banner = format!("======= **{namespace}** =======");
    let mut out = String::new();

    for frame in stacks.iter().filter(|f| changes.contains_key(&f.id)) {
        let _ = writeln!(out, "{banner}\n");
        let _ = writeln!(out, "**[FAIL]** {}\n", quoted_path(&frame.path));
        let _ = writeln!(out, "**{}**: `{}`", frame.error.name, frame.error.message);
        let _ = writeln!(out, "  ❯ `{}`\n", frame.location());

        if let Some(code) = snippet(frame) {
            let _ = writeln!(out, "```js\n{code}\n```\n");
        }
        if let Some(diff) = &frame.error.diff {
            let _ = writeln!(out, "```diff\n{}\n```\n", strip_ansi(diff));
        }
        if let Some(change) = changes.get(&frame.id) {
            let _ = writeln!(out, "Record: [{}]({})\n", change.page_id, change.page_url);
        }
    }

    for change in changes.values() {
        if stacks.iter().any(|f| f.id == change.id) {
            continue;
        }
        let _ = writeln!(out, "{banner}\n");
        let _ = writeln!(out, "**[{}]** {}\n", change.status, quoted_path(&change.path));
    }

    out
}

/// Snippet provider reading each frame's source file from disk.
pub fn file_snippets(context: usize) -> impl Fn(&StackFrame) -> Option<String> {
    move |frame| {
        let line = frame.line? as usize;
        let column = frame.column.unwrap_or(0) as usize;
        if frame.file.path.is_empty() {
            return None;
        }
        read_snippet(Path::new(&frame.file.path), line, column, context)
    }
}
