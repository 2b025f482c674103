//! The coverage report comment on a pull request.
//!
//! The comment opens with a hidden marker so later runs can find and edit
//! the bot's previous report instead of stacking new ones. The body is a
//! markdown table of base, head, and delta, followed by the uncovered
//! lines per file when there are any.

use std::fmt::Write as _;

use chrono::Utc;

use crate::coverage::{AnalysisResult, Comparison, sort_and_group};
use crate::github::IssueComment;
use crate::types::CommentId;

/// Hidden marker identifying the bot's report comment.
pub const COMMENT_MARKER: &str = "<!-- canopy-coverage-report -->";

/// Renders the report body.
pub fn render_comment(comparison: &Comparison, analysis: &AnalysisResult) -> String {
    let mut body = String::new();

    let _ = writeln!(body, "{COMMENT_MARKER}");
    let _ = writeln!(body, "## Coverage report");
    let _ = writeln!(body);
    let _ = writeln!(body, "| | Coverage |");
    let _ = writeln!(body, "|---|---|");
    let _ = writeln!(body, "| Base | {:.1}% |", comparison.base_pct);
    let _ = writeln!(body, "| Head | {:.1}% |", comparison.head_pct);
    let _ = writeln!(body, "| **Delta** | **{:+.1}%** |", comparison.delta_pct);
    let _ = writeln!(body);

    if analysis.has_uncovered_lines() {
        let _ = writeln!(body, "### Uncovered lines in diff");
        let _ = writeln!(body);
        let _ = writeln!(body, "| File | Lines |");
        let _ = writeln!(body, "|------|-------|");
        for (file, lines) in &analysis.uncovered_by_file {
            let _ = writeln!(body, "| {} | {} |", file, format_line_ranges(lines));
        }
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "**{} uncovered of {} instrumented added lines.**",
            analysis.total_uncovered(),
            analysis.diff_added_instrumented
        );
    } else if analysis.diff_added_lines == 0 {
        let _ = writeln!(body, "No instrumented lines were added in this diff.");
    } else {
        let _ = writeln!(body, "All added lines are covered.");
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "_Updated {}_", Utc::now().to_rfc3339());

    body
}

/// Formats line numbers as compact ranges: `5-7, 10`.
fn format_line_ranges(lines: &[u32]) -> String {
    let ranges: Vec<String> = sort_and_group(lines)
        .into_iter()
        .map(|r| {
            if r.start == r.end {
                r.start.to_string()
            } else {
                format!("{}-{}", r.start, r.end)
            }
        })
        .collect();
    ranges.join(", ")
}

/// Finds the most recent comment carrying the report marker. Comments are
/// listed oldest first, so the scan runs from the back.
pub fn find_report_comment(comments: &[IssueComment]) -> Option<CommentId> {
    comments
        .iter()
        .rev()
        .find(|c| c.body.contains(COMMENT_MARKER))
        .map(|c| c.id)
}
