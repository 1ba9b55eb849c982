//! Change detection between two versions of a document.
//!
//! [`changed`] is the gate used before creating a version: exact, ordinal
//! comparison where any byte difference counts. [`diff`] is the
//! human-facing view, a line alignment where a line that was rewritten in
//! place is reported once as [`LineStatus::Modified`] instead of as a
//! deletion followed by an insertion.

use crate::{SnapshotError, SnapshotResult};
use similar::{ChangeTag, TextDiff};
use std::fmt;
use std::path::Path;
use tokio::fs;

/// How a line relates between the old and the new text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineStatus {
    Unchanged,
    Inserted,
    Deleted,
    Modified,
}

impl LineStatus {
    /// Single-character tag used when rendering a diff.
    pub fn tag(&self) -> char {
        match self {
            LineStatus::Unchanged => ' ',
            LineStatus::Inserted => '+',
            LineStatus::Deleted => '-',
            LineStatus::Modified => '~',
        }
    }
}

/// One line of a tagged diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub status: LineStatus,
    /// The line text. For `Deleted` lines this is the old text, otherwise
    /// the new text.
    pub text: String,
    /// The replaced text, only set for `Modified` lines.
    pub previous: Option<String>,
}

impl DiffLine {
    fn new(status: LineStatus, text: &str) -> Self {
        Self {
            status,
            text: text.to_string(),
            previous: None,
        }
    }

    fn modified(old: &str, new: &str) -> Self {
        Self {
            status: LineStatus::Modified,
            text: new.to_string(),
            previous: Some(old.to_string()),
        }
    }
}

impl fmt::Display for DiffLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.tag(), self.text)
    }
}

/// Whether two texts differ. Case- and whitespace-sensitive.
pub fn changed(old: &str, new: &str) -> bool {
    old != new
}

/// Byte-level variant of [`changed`].
pub fn changed_bytes(old: &[u8], new: &[u8]) -> bool {
    old != new
}

/// Compare two files byte for byte.
///
/// Both files are read fully. A missing or unreadable file is an error, never
/// "changed".
pub async fn files_changed(old: &Path, new: &Path) -> SnapshotResult<bool> {
    let old_bytes = read_for_compare(old).await?;
    let new_bytes = read_for_compare(new).await?;
    Ok(changed_bytes(&old_bytes, &new_bytes))
}

/// Line diff of two texts.
pub fn diff(old: &str, new: &str) -> Vec<DiffLine> {
    let text_diff = TextDiff::from_lines(old, new);
    let mut lines = Vec::new();
    let mut deleted: Vec<&str> = Vec::new();
    let mut inserted: Vec<&str> = Vec::new();

    for op in text_diff.ops() {
        for change in text_diff.iter_changes(op) {
            let value = trim_eol(change.value());
            match change.tag() {
                ChangeTag::Equal => {
                    flush_hunk(&mut lines, &mut deleted, &mut inserted);
                    lines.push(DiffLine::new(LineStatus::Unchanged, value));
                }
                ChangeTag::Delete => deleted.push(value),
                ChangeTag::Insert => inserted.push(value),
            }
        }
    }
    flush_hunk(&mut lines, &mut deleted, &mut inserted);

    lines
}

/// Line diff of two files. Fails with `Unreadable` if either side is missing.
pub async fn diff_files(old: &Path, new: &Path) -> SnapshotResult<Vec<DiffLine>> {
    let old_text = read_text(old).await?;
    let new_text = read_text(new).await?;
    Ok(diff(&old_text, &new_text))
}

/// Render a tagged diff, one line per entry.
pub fn render_tagged(lines: &[DiffLine]) -> String {
    let mut output = String::new();
    for line in lines {
        output.push_str(&line.to_string());
        output.push('\n');
    }
    output
}

/// Generate a unified diff between two strings.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut output = String::new();

    output.push_str(&format!("--- {old_label}\n"));
    output.push_str(&format!("+++ {new_label}\n"));

    for (idx, group) in diff.grouped_ops(3).iter().enumerate() {
        if idx > 0 {
            output.push_str("...\n");
        }

        for op in group {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };

                output.push_str(sign);
                output.push_str(change.value());
                if !change.value().ends_with('\n') {
                    output.push('\n');
                }
            }
        }
    }

    output
}

/// Pair up a run of deletions and insertions: aligned positions become
/// `Modified`, the remainder stays `Deleted`/`Inserted`.
fn flush_hunk(lines: &mut Vec<DiffLine>, deleted: &mut Vec<&str>, inserted: &mut Vec<&str>) {
    let paired = deleted.len().min(inserted.len());
    for (old, new) in deleted.iter().zip(inserted.iter()) {
        lines.push(DiffLine::modified(old, new));
    }
    for old in &deleted[paired..] {
        lines.push(DiffLine::new(LineStatus::Deleted, old));
    }
    for new in &inserted[paired..] {
        lines.push(DiffLine::new(LineStatus::Inserted, new));
    }
    deleted.clear();
    inserted.clear();
}

fn trim_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

async fn read_for_compare(path: &Path) -> SnapshotResult<Vec<u8>> {
    fs::read(path)
        .await
        .map_err(|e| SnapshotError::unreadable(path, e))
}

pub(crate) async fn read_text(path: &Path) -> SnapshotResult<String> {
    let bytes = read_for_compare(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
