//! Cross-references merged coverage profiles with a diff to classify each
//! added line, and computes statement-weighted coverage percentages.
//!
//! Profile file names are module-qualified (`example.com/pkg/handler.go`)
//! while diff paths are repo-relative (`pkg/handler.go`). The resolver
//! matches the two by suffix, requiring a `/` at the match boundary so that
//! `handler.go` never matches `myhandler.go`. When several diff paths are
//! suffixes of the same profile name, the longest one wins.

use std::collections::{BTreeMap, HashMap};

use super::profile::Profile;

/// The outcome of analysing one merged coverage run against a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResult {
    /// Uncovered added lines, keyed by diff file path. Files with no
    /// uncovered lines are absent.
    pub uncovered_by_file: BTreeMap<String, Vec<u32>>,

    /// Total added lines in diff files that have coverage data.
    pub diff_added_lines: u64,

    /// Added lines that fall in at least one coverage block.
    pub diff_added_instrumented: u64,

    /// Added lines covered by at least one executed block.
    pub diff_added_covered: u64,
}

impl AnalysisResult {
    /// Returns true if any added line is uncovered.
    pub fn has_uncovered_lines(&self) -> bool {
        self.uncovered_by_file.values().any(|v| !v.is_empty())
    }

    /// Total number of uncovered added lines.
    pub fn total_uncovered(&self) -> u64 {
        self.uncovered_by_file.values().map(|v| v.len() as u64).sum()
    }
}

/// How a single added line relates to the coverage blocks of its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Not inside any block: a comment, blank line, or declaration.
    NotInstrumented,
    /// Inside at least one executed block. Any covering block wins, even if
    /// an overlapping block went unexecuted.
    Covered,
    /// Instrumented but never executed.
    Uncovered,
}

fn classify_line(profile: &Profile, line: u32) -> LineState {
    let mut instrumented = false;
    for block in &profile.blocks {
        if block.contains_line(line) {
            if block.count > 0 {
                return LineState::Covered;
            }
            instrumented = true;
        }
    }
    if instrumented {
        LineState::Uncovered
    } else {
        LineState::NotInstrumented
    }
}

/// Finds the diff file matching a profile's module-qualified name.
fn resolve_diff_file<'a>(
    profile_name: &str,
    added_lines_by_file: &'a HashMap<String, Vec<u32>>,
) -> Option<(&'a str, &'a [u32])> {
    if let Some((key, lines)) = added_lines_by_file.get_key_value(profile_name) {
        return Some((key.as_str(), lines.as_slice()));
    }

    let mut best: Option<(&'a str, &'a [u32])> = None;
    for (diff_file, lines) in added_lines_by_file {
        let boundary = profile_name.len().checked_sub(diff_file.len() + 1);
        let matches = boundary.is_some_and(|i| {
            profile_name.as_bytes()[i] == b'/' && profile_name.ends_with(diff_file.as_str())
        });
        if matches && best.is_none_or(|(current, _)| diff_file.len() > current.len()) {
            best = Some((diff_file.as_str(), lines.as_slice()));
        }
    }
    best
}

/// Classifies every added line of every diff file that has coverage data.
///
/// Diff files without coverage data are ignored, as are profiles for files
/// outside the diff. Uncovered lines are bucketed per file only when the
/// bucket is non-empty.
pub fn analyze(
    profiles: &[Profile],
    added_lines_by_file: &HashMap<String, Vec<u32>>,
) -> AnalysisResult {
    let mut result = AnalysisResult::default();

    for profile in profiles {
        let Some((diff_file, added_lines)) = resolve_diff_file(&profile.file_name, added_lines_by_file)
        else {
            continue;
        };

        result.diff_added_lines += added_lines.len() as u64;

        let mut uncovered: Vec<u32> = Vec::new();
        for &line in added_lines {
            match classify_line(profile, line) {
                LineState::NotInstrumented => {}
                LineState::Covered => {
                    result.diff_added_instrumented += 1;
                    result.diff_added_covered += 1;
                }
                LineState::Uncovered => {
                    result.diff_added_instrumented += 1;
                    uncovered.push(line);
                }
            }
        }

        if !uncovered.is_empty() {
            result
                .uncovered_by_file
                .insert(diff_file.to_string(), uncovered);
        }
    }

    result
}

/// Statement-weighted coverage for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub total_statements: u64,
    pub covered_statements: u64,
}

impl FileStats {
    /// Covered percentage; zero statements count as 0%.
    pub fn percentage(&self) -> f64 {
        if self.total_statements == 0 {
            0.0
        } else {
            self.covered_statements as f64 / self.total_statements as f64 * 100.0
        }
    }
}

/// Statement-weighted coverage across a set of profiles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageStats {
    pub total_statements: u64,
    pub covered_statements: u64,
    pub by_file: BTreeMap<String, FileStats>,
}

impl CoverageStats {
    /// Overall covered percentage; zero statements count as 0%.
    pub fn percentage(&self) -> f64 {
        FileStats {
            total_statements: self.total_statements,
            covered_statements: self.covered_statements,
        }
        .percentage()
    }
}

/// Computes coverage statistics from profiles. A block's statements count as
/// covered when the block was executed at least once.
pub fn coverage_stats(profiles: &[Profile]) -> CoverageStats {
    let mut stats = CoverageStats::default();

    for profile in profiles {
        let mut file = FileStats::default();
        for block in &profile.blocks {
            file.total_statements += block.num_stmt;
            if block.count > 0 {
                file.covered_statements += block.num_stmt;
            }
        }

        stats.total_statements += file.total_statements;
        stats.covered_statements += file.covered_statements;
        stats.by_file.insert(profile.file_name.clone(), file);
    }

    stats
}

/// The head coverage percentage against the default-branch baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub base_pct: f64,
    pub head_pct: f64,
    pub delta_pct: f64,
    pub decreased: bool,
}

/// Compares head coverage with a baseline. A missing baseline is a 0%
/// baseline, never a failure.
pub fn compare(base: Option<&CoverageStats>, head: &CoverageStats) -> Comparison {
    let base_pct = base.map_or(0.0, CoverageStats::percentage);
    let head_pct = head.percentage();
    let delta_pct = head_pct - base_pct;

    Comparison {
        base_pct,
        head_pct,
        delta_pct,
        decreased: delta_pct < 0.0,
    }
}
