//! Builds check-run annotations from an analysis result.
//!
//! Consecutive uncovered lines collapse into closed ranges, one annotation
//! per range, ordered by file name and then by line. The caller batches the
//! emitted sequence against the forge's per-update annotation ceiling.

use serde::Serialize;

use super::analysis::AnalysisResult;

/// A closed range of consecutive line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// Severity of an annotation on the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

impl AnnotationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationLevel::Notice => "notice",
            AnnotationLevel::Warning => "warning",
            AnnotationLevel::Failure => "failure",
        }
    }
}

/// A structured comment attached to a source location on a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub level: AnnotationLevel,
    pub title: String,
    pub message: String,
}

/// Groups consecutive line numbers into ranges. The input must be sorted
/// ascending.
pub fn group_into_ranges(lines: &[u32]) -> Vec<LineRange> {
    let mut ranges = Vec::new();
    let Some(&first) = lines.first() else {
        return ranges;
    };

    let mut start = first;
    let mut end = first;
    for &line in &lines[1..] {
        if line == end + 1 {
            end = line;
        } else {
            ranges.push(LineRange { start, end });
            start = line;
            end = line;
        }
    }
    ranges.push(LineRange { start, end });

    ranges
}

/// Sorts line numbers and groups them into ranges.
pub fn sort_and_group(lines: &[u32]) -> Vec<LineRange> {
    let mut sorted = lines.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    group_into_ranges(&sorted)
}

/// Builds one `notice` annotation per uncovered range.
///
/// Files are visited alphabetically and lines within a file ascending, so
/// the emitted order is stable.
pub fn build_annotations(result: &AnalysisResult) -> Vec<Annotation> {
    let mut annotations = Vec::new();

    for (file, lines) in &result.uncovered_by_file {
        for range in sort_and_group(lines) {
            let (title, message) = if range.start == range.end {
                (
                    "Uncovered line",
                    format!("Line {} is not covered by tests", range.start),
                )
            } else {
                (
                    "Uncovered lines",
                    format!(
                        "Lines {}-{} are not covered by tests",
                        range.start, range.end
                    ),
                )
            };

            annotations.push(Annotation {
                path: file.clone(),
                start_line: range.start,
                end_line: range.end,
                level: AnnotationLevel::Notice,
                title: title.to_string(),
                message,
            });
        }
    }

    annotations
}
