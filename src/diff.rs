//! Unified diff parsing.
//!
//! Turns a unified diff (as produced by source-control tools or the forge's
//! API) into the set of line numbers added per file. Only the new side of
//! each hunk matters: `+` lines are recorded, `-` lines do not advance the
//! new-line counter, context lines and blank body lines do, and `\` markers
//! are ignored.

use std::collections::HashMap;

use thiserror::Error;

/// Errors produced by the diff parser.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The input contained zero bytes.
    #[error("diff data is empty")]
    EmptyDiff,
}

/// The changes to a single file in a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    /// Path on the old side, without the `a/` prefix.
    pub old_name: String,
    /// Path on the new side, without the `b/` prefix.
    pub new_name: String,
    /// Line numbers (new side) added by this diff.
    pub added_lines: Vec<u32>,
    pub is_binary: bool,
    pub is_renamed: bool,
    pub is_deleted: bool,
}

/// Strips the customary `a/` or `b/` prefix from a diff path.
fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Parses the new-side start line out of a hunk header like
/// `@@ -10,5 +20,8 @@`. Returns `None` for malformed headers.
fn parse_hunk_header(line: &str) -> Option<u32> {
    let rest = line.strip_prefix("@@ ")?;
    let new_part = rest
        .split(' ')
        .find(|part| part.starts_with('+'))?
        .strip_prefix('+')?;
    let start = new_part.split(',').next()?;
    start.parse().ok()
}

/// Parses a unified diff into per-file sections.
///
/// Malformed hunk headers are skipped without aborting the whole diff.
/// Fails with [`DiffError::EmptyDiff`] on empty input.
pub fn parse_diff(data: &str) -> Result<Vec<FileDiff>, DiffError> {
    if data.is_empty() {
        return Err(DiffError::EmptyDiff);
    }

    let mut diffs: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut current_line: u32 = 0;

    for line in data.lines() {
        // Start of a new file section.
        if let Some(rest) = line.strip_prefix("diff --git ")
            && let Some((old, new)) = rest.split_once(" b/")
        {
            if let Some(done) = current.take() {
                diffs.push(done);
            }
            current = Some(FileDiff {
                old_name: strip_diff_prefix(old).to_string(),
                new_name: new.to_string(),
                ..FileDiff::default()
            });
            current_line = 0;
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.is_binary = true;
            continue;
        }
        if line.starts_with("deleted file mode") {
            file.is_deleted = true;
            continue;
        }
        if line.starts_with("rename from ") {
            file.is_renamed = true;
            continue;
        }
        if let Some(old) = line.strip_prefix("--- ") {
            if old != "/dev/null" {
                file.old_name = strip_diff_prefix(old).to_string();
            }
            continue;
        }
        if let Some(new) = line.strip_prefix("+++ ") {
            if new != "/dev/null" {
                file.new_name = strip_diff_prefix(new).to_string();
            }
            continue;
        }
        if line.starts_with("@@ ") {
            if let Some(start) = parse_hunk_header(line) {
                current_line = start;
            }
            continue;
        }

        // Hunk body.
        if line.is_empty() {
            // A blank body line exists in both versions.
            current_line += 1;
            continue;
        }
        match line.as_bytes()[0] {
            b'+' => {
                if !line.starts_with("+++") {
                    file.added_lines.push(current_line);
                    current_line += 1;
                }
            }
            b'-' => {
                // Removed line: the new-side counter stays put.
            }
            b' ' => {
                current_line += 1;
            }
            b'\\' => {
                // "\ No newline at end of file" marker.
            }
            _ => {
                // Metadata such as "index ..." or "new file mode".
            }
        }
    }

    if let Some(done) = current.take() {
        diffs.push(done);
    }

    Ok(diffs)
}

/// Flattens file diffs into `{file -> added lines}` for the analyser.
///
/// Binary files, deleted files, files without additions, and files outside
/// the instrumented language (`.go`) are excluded.
pub fn added_lines_by_file(diffs: &[FileDiff]) -> HashMap<String, Vec<u32>> {
    diffs
        .iter()
        .filter(|d| !d.is_binary && !d.is_deleted && !d.added_lines.is_empty())
        .filter(|d| d.new_name.ends_with(".go"))
        .map(|d| (d.new_name.clone(), d.added_lines.clone()))
        .collect()
}
