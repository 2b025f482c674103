//! Parsing, serialisation, and validation of the textual coverage format.
//!
//! The format is line oriented:
//!
//! ```text
//! mode: set|count|atomic
//! <file>:<startLine>.<startCol>,<endLine>.<endCol> <numStmt> <count>
//! ```
//!
//! The first line is a mode header; every subsequent non-blank line describes
//! one coverage block. Blocks for the same file are grouped into a single
//! [`Profile`], preserving first-appearance order of the files.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use super::CoverageError;

/// How execution counts are recorded in a profile.
///
/// `set` stores presence (0/1); `count` and `atomic` accumulate execution
/// counts. Modes outside the three standard ones are carried through
/// uninterpreted so that profiles produced by third-party merge tools still
/// round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    Set,
    Count,
    Atomic,
    Other(String),
}

impl Mode {
    /// Parses a mode name. Never fails; unrecognised names become
    /// [`Mode::Other`].
    pub fn parse(name: &str) -> Mode {
        match name {
            "set" => Mode::Set,
            "count" => Mode::Count,
            "atomic" => Mode::Atomic,
            other => Mode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Set => "set",
            Mode::Count => "count",
            Mode::Atomic => "atomic",
            Mode::Other(name) => name,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single coverage block: a region of source text carrying a statement
/// count and an execution count. Line and column ranges are inclusive on
/// both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub num_stmt: u64,
    pub count: u64,
}

impl Block {
    /// Returns true if the given line falls within this block's line range.
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    /// The identity of this block for merging: position plus statement
    /// count, excluding the execution count.
    pub fn key(&self) -> BlockKey {
        BlockKey {
            start_line: self.start_line,
            start_col: self.start_col,
            end_line: self.end_line,
            end_col: self.end_col,
            num_stmt: self.num_stmt,
        }
    }
}

/// Merge identity of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
    pub num_stmt: u64,
}

/// All coverage blocks for one source file under one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub file_name: String,
    pub mode: Mode,
    pub blocks: Vec<Block>,
}

/// Parses coverage data in the textual profile format.
///
/// Returns one [`Profile`] per distinct file name, in order of first
/// appearance. Fails with [`CoverageError::EmptyProfile`] on zero bytes and
/// [`CoverageError::MalformedProfile`] when the mode header is missing or a
/// body line does not have the `file:sL.sC,eL.eC n c` shape.
pub fn parse_profiles(data: &[u8]) -> Result<Vec<Profile>, CoverageError> {
    if data.is_empty() {
        return Err(CoverageError::EmptyProfile);
    }

    let text = std::str::from_utf8(data).map_err(|_| CoverageError::MalformedProfile {
        line: 0,
        reason: "not valid UTF-8".to_string(),
    })?;

    let mut lines = text.lines().enumerate();

    // The first non-blank line must be the mode header.
    let (header_idx, header) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| CoverageError::MalformedProfile {
            line: 1,
            reason: "missing mode header".to_string(),
        })?;
    let mode_name =
        header
            .trim()
            .strip_prefix("mode: ")
            .ok_or_else(|| CoverageError::MalformedProfile {
                line: header_idx + 1,
                reason: format!("expected mode header, got {:?}", header.trim()),
            })?;
    let mode = Mode::parse(mode_name.trim());

    let mut order: Vec<String> = Vec::new();
    let mut by_file: HashMap<String, Vec<Block>> = HashMap::new();

    for (idx, raw) in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (file, block) =
            parse_block_line(line).map_err(|reason| CoverageError::MalformedProfile {
                line: idx + 1,
                reason,
            })?;
        if !by_file.contains_key(file) {
            order.push(file.to_string());
        }
        by_file.entry(file.to_string()).or_default().push(block);
    }

    Ok(order
        .into_iter()
        .map(|file_name| {
            let blocks = by_file.remove(&file_name).unwrap_or_default();
            Profile {
                file_name,
                mode: mode.clone(),
                blocks,
            }
        })
        .collect())
}

/// Parses one body line into a file name and a block.
///
/// Format: `<file>:<startLine>.<startCol>,<endLine>.<endCol> <numStmt> <count>`.
/// The file path is split off at the last colon, which keeps paths containing
/// colons intact.
fn parse_block_line(line: &str) -> Result<(&str, Block), String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, got {}", fields.len()));
    }

    let (file, range) = fields[0]
        .rsplit_once(':')
        .ok_or_else(|| "missing ':' between file and range".to_string())?;
    if file.is_empty() {
        return Err("empty file name".to_string());
    }

    let (start, end) = range
        .split_once(',')
        .ok_or_else(|| "missing ',' in range".to_string())?;
    let (start_line, start_col) = parse_position(start)?;
    let (end_line, end_col) = parse_position(end)?;

    let num_stmt: u64 = fields[1]
        .parse()
        .map_err(|_| format!("invalid statement count {:?}", fields[1]))?;
    let count: u64 = fields[2]
        .parse()
        .map_err(|_| format!("invalid execution count {:?}", fields[2]))?;

    Ok((
        file,
        Block {
            start_line,
            start_col,
            end_line,
            end_col,
            num_stmt,
            count,
        },
    ))
}

/// Parses a `line.col` position.
fn parse_position(s: &str) -> Result<(u32, u32), String> {
    let (line, col) = s
        .split_once('.')
        .ok_or_else(|| format!("invalid position {s:?}"))?;
    let line = line
        .parse()
        .map_err(|_| format!("invalid line number {line:?}"))?;
    let col = col
        .parse()
        .map_err(|_| format!("invalid column number {col:?}"))?;
    Ok((line, col))
}

/// Serialises profiles back to the textual format.
///
/// The header mode is taken from the first profile. Fails with
/// [`CoverageError::NoProfiles`] on an empty input.
pub fn serialize_profiles(profiles: &[Profile]) -> Result<Vec<u8>, CoverageError> {
    let first = profiles.first().ok_or(CoverageError::NoProfiles)?;

    let mut out = String::new();
    // Infallible on String.
    let _ = writeln!(out, "mode: {}", first.mode);
    for profile in profiles {
        for b in &profile.blocks {
            let _ = writeln!(
                out,
                "{}:{}.{},{}.{} {} {}",
                profile.file_name, b.start_line, b.start_col, b.end_line, b.end_col, b.num_stmt,
                b.count
            );
        }
    }

    Ok(out.into_bytes())
}

/// Checks the structural invariants of a parsed profile.
///
/// Parsing only guarantees the shape of each line; this checks that line
/// ranges are positive and well-ordered. A violation here means the producer
/// of the profile is broken.
pub fn validate_profile(profile: &Profile) -> Result<(), CoverageError> {
    if profile.file_name.is_empty() {
        return Err(CoverageError::InvalidBlock {
            file: String::new(),
            index: 0,
            reason: "profile has empty file name".to_string(),
        });
    }

    for (index, b) in profile.blocks.iter().enumerate() {
        let violation = if b.start_line == 0 {
            Some("start line must be at least 1".to_string())
        } else if b.end_line < b.start_line {
            Some(format!(
                "end line {} before start line {}",
                b.end_line, b.start_line
            ))
        } else if b.start_line == b.end_line && b.end_col < b.start_col {
            Some(format!(
                "end column {} before start column {} on the same line",
                b.end_col, b.start_col
            ))
        } else {
            None
        };

        if let Some(reason) = violation {
            return Err(CoverageError::InvalidBlock {
                file: profile.file_name.clone(),
                index,
                reason,
            });
        }
    }

    Ok(())
}
