//! End-to-end processing of one work request.
//!
//! The processor re-fetches authoritative run state from the forge, pulls
//! and parses coverage artifacts, merges them, and then either persists the
//! default-branch baseline or annotates the pull request. Every step is
//! overwriting or locatable-and-updatable, so redelivered requests converge
//! to the same final state.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::coverage::{
    AnalysisResult, Annotation, Comparison, CoverageError, CoverageStats, Profile, analyze,
    build_annotations, compare, coverage_stats, merge_profiles, parse_profiles,
    parse_profiles_from_zip, serialize_profiles, validate_profile,
};
use crate::diff::{DiffError, added_lines_by_file, parse_diff};
use crate::github::{
    CheckConclusion, CheckRunOutput, CheckRunUpdate, CheckStatus, ForgeClient, ForgeError,
    MAX_ANNOTATIONS_PER_UPDATE, WorkflowRun,
};
use crate::queue::{HandlerError, WorkHandler, WorkRequest};
use crate::storage::{CoverageKey, Storage, StorageError};
use crate::types::{CheckRunId, PrNumber, RepoId, RunId};
use crate::worker::comment::{find_report_comment, render_comment};

/// Name under which the coverage check run appears on the PR.
const CHECK_NAME: &str = "canopy/coverage";

/// Title shown on the check-run output.
const OUTPUT_TITLE: &str = "Coverage";

/// Errors that fail a work request. The queue redelivers on failure, so
/// every variant here must be safe to re-run.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),

    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    /// The run is neither on the default branch nor associated with a pull
    /// request (e.g. the head was force-pushed away).
    #[error("workflow run {0} has no associated pull request")]
    NoPullRequest(RunId),
}

/// Processes work requests against a forge and a blob store.
pub struct Processor {
    forge: Arc<dyn ForgeClient>,
    storage: Arc<dyn Storage>,
}

impl Processor {
    pub fn new(forge: Arc<dyn ForgeClient>, storage: Arc<dyn Storage>) -> Self {
        Processor { forge, storage }
    }

    /// Runs the full pipeline for one request.
    #[instrument(
        skip(self, req),
        fields(org = %req.org, repo = %req.repo, run_id = req.workflow_run_id)
    )]
    pub async fn process(&self, req: &WorkRequest) -> Result<(), ProcessError> {
        let repo = RepoId::new(&req.org, &req.repo);
        let run = self
            .forge
            .get_workflow_run(&repo, RunId(req.workflow_run_id))
            .await?;
        let default_branch = self.forge.get_default_branch(&repo).await?;

        let profiles = self.collect_profiles(&repo, &run).await?;
        if profiles.is_empty() {
            info!("run has no coverage artifacts; nothing to do");
            return Ok(());
        }

        let merged = merge_profiles(&profiles)?;

        if run.head_branch == default_branch {
            self.persist_baseline(&repo, &default_branch, &merged).await
        } else {
            self.process_pull_request(&repo, &run, &default_branch, &merged)
                .await
        }
    }

    /// Downloads and parses every coverage artifact of the run.
    ///
    /// Artifacts whose archives contain no parseable coverage are skipped;
    /// zero artifacts overall is a successful no-op for the caller.
    async fn collect_profiles(
        &self,
        repo: &RepoId,
        run: &WorkflowRun,
    ) -> Result<Vec<Profile>, ProcessError> {
        let artifacts = self.forge.list_artifacts(repo, run.id).await?;

        let mut profiles = Vec::new();
        for artifact in artifacts
            .iter()
            .filter(|a| !a.expired && a.name.to_ascii_lowercase().starts_with("coverage"))
        {
            let archive = self.forge.download_artifact(repo, artifact.id).await?;
            match parse_profiles_from_zip(&archive) {
                Ok(parsed) => {
                    // Structural violations indicate a broken producer.
                    // Report them; the lines still merge deterministically.
                    for profile in &parsed {
                        if let Err(error) = validate_profile(profile) {
                            warn!(artifact = %artifact.name, %error, "profile fails validation");
                        }
                    }
                    info!(
                        artifact = %artifact.name,
                        profiles = parsed.len(),
                        "parsed coverage artifact"
                    );
                    profiles.extend(parsed);
                }
                Err(error @ (CoverageError::NoProfiles | CoverageError::EmptyProfile)) => {
                    warn!(artifact = %artifact.name, %error, "artifact had no parseable coverage");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(profiles)
    }

    /// Default-branch run: overwrite the baseline blob and finish.
    async fn persist_baseline(
        &self,
        repo: &RepoId,
        branch: &str,
        merged: &[Profile],
    ) -> Result<(), ProcessError> {
        let data = serialize_profiles(merged)?;
        let key = CoverageKey::new(&repo.owner, &repo.repo, branch);
        self.storage.put(&key, &data).await?;

        info!(branch, bytes = data.len(), "baseline updated");
        Ok(())
    }

    /// Pull-request run: analyse against the diff and report.
    async fn process_pull_request(
        &self,
        repo: &RepoId,
        run: &WorkflowRun,
        default_branch: &str,
        merged: &[Profile],
    ) -> Result<(), ProcessError> {
        let pr_number = *run
            .pull_requests
            .first()
            .ok_or(ProcessError::NoPullRequest(run.id))?;

        let pr = self.forge.get_pull_request(repo, pr_number).await?;
        let diff_text = self.forge.get_pull_request_diff(repo, pr_number).await?;
        let added = added_lines_by_file(&parse_diff(&diff_text)?);

        let baseline = self.load_baseline(repo, default_branch).await?;

        // The check run is recreated per run; retries overwrite it.
        let check_run = self
            .forge
            .create_check_run(repo, CHECK_NAME, &pr.head_sha)
            .await?;

        let analysis = analyze(merged, &added);
        let annotations = build_annotations(&analysis);

        let head_stats = coverage_stats(merged);
        let comparison = compare(baseline.as_ref(), &head_stats);

        self.update_check_run_batched(repo, check_run, &annotations, &comparison)
            .await?;
        self.upsert_comment(repo, pr_number, &comparison, &analysis)
            .await?;

        info!(
            pr = %pr_number,
            added = analysis.diff_added_lines,
            instrumented = analysis.diff_added_instrumented,
            covered = analysis.diff_added_covered,
            uncovered = analysis.total_uncovered(),
            head_pct = comparison.head_pct,
            delta_pct = comparison.delta_pct,
            "pull request annotated"
        );
        Ok(())
    }

    /// Loads and parses the default-branch baseline.
    ///
    /// Absence is a 0% baseline. A blob that exists but no longer parses is
    /// treated the same way; the next default-branch run overwrites it.
    async fn load_baseline(
        &self,
        repo: &RepoId,
        default_branch: &str,
    ) -> Result<Option<CoverageStats>, ProcessError> {
        let key = CoverageKey::new(&repo.owner, &repo.repo, default_branch);
        let Some(bytes) = self.storage.get(&key).await? else {
            info!(branch = default_branch, "no baseline yet; comparing against 0%");
            return Ok(None);
        };

        match parse_profiles(&bytes) {
            Ok(profiles) => Ok(Some(coverage_stats(&profiles))),
            Err(error) => {
                warn!(branch = default_branch, %error, "baseline blob unreadable; treating as absent");
                Ok(None)
            }
        }
    }

    /// Pushes annotations in batches under the per-update ceiling. The final
    /// call completes the check run with the conclusion and summary.
    async fn update_check_run_batched(
        &self,
        repo: &RepoId,
        check_run: CheckRunId,
        annotations: &[Annotation],
        comparison: &Comparison,
    ) -> Result<(), ProcessError> {
        let conclusion = if comparison.delta_pct >= 0.0 {
            CheckConclusion::Success
        } else {
            CheckConclusion::Failure
        };
        let summary = format!(
            "Project coverage {:.1}%, change {:+.1}%",
            comparison.head_pct, comparison.delta_pct
        );

        let output = |chunk: &[Annotation]| CheckRunOutput {
            title: OUTPUT_TITLE.to_string(),
            summary: summary.clone(),
            annotations: chunk.to_vec(),
        };

        if annotations.is_empty() {
            self.forge
                .update_check_run(
                    repo,
                    check_run,
                    CheckRunUpdate {
                        status: Some(CheckStatus::Completed),
                        conclusion: Some(conclusion),
                        output: Some(output(&[])),
                    },
                )
                .await?;
            return Ok(());
        }

        let chunks: Vec<&[Annotation]> = annotations.chunks(MAX_ANNOTATIONS_PER_UPDATE).collect();
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let update = if index == last {
                CheckRunUpdate {
                    status: Some(CheckStatus::Completed),
                    conclusion: Some(conclusion),
                    output: Some(output(chunk)),
                }
            } else {
                CheckRunUpdate {
                    status: None,
                    conclusion: None,
                    output: Some(output(chunk)),
                }
            };
            self.forge.update_check_run(repo, check_run, update).await?;
        }

        Ok(())
    }

    /// Creates the report comment, or edits the previous one found by
    /// marker.
    async fn upsert_comment(
        &self,
        repo: &RepoId,
        pr_number: PrNumber,
        comparison: &Comparison,
        analysis: &AnalysisResult,
    ) -> Result<(), ProcessError> {
        let comments = self.forge.list_issue_comments(repo, pr_number).await?;
        let body = render_comment(comparison, analysis);

        match find_report_comment(&comments) {
            Some(existing) => {
                self.forge
                    .update_issue_comment(repo, existing, &body)
                    .await?;
            }
            None => {
                self.forge
                    .create_issue_comment(repo, pr_number, &body)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkHandler for Processor {
    async fn handle(&self, req: WorkRequest) -> Result<(), HandlerError> {
        if let Err(error) = self.process(&req).await {
            // Forge failures carry a transient/permanent category; surface
            // it so redelivery loops are legible from the logs.
            match &error {
                ProcessError::Forge(forge_error) => tracing::error!(
                    org = %req.org,
                    repo = %req.repo,
                    run_id = req.workflow_run_id,
                    %error,
                    retriable = forge_error.kind.is_retriable(),
                    "coverage processing failed"
                ),
                _ => tracing::error!(
                    org = %req.org,
                    repo = %req.repo,
                    run_id = req.workflow_run_id,
                    %error,
                    "coverage processing failed"
                ),
            }
            return Err(error.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::AnnotationLevel;
    use crate::github::Artifact;
    use crate::storage::InMemoryStorage;
    use crate::test_utils::{FakeForge, zip_bytes};

    const DIFF_F_GO: &str = "\
diff --git a/pkg/f.go b/pkg/f.go
--- a/pkg/f.go
+++ b/pkg/f.go
@@ -1,2 +5,7 @@
+five
+six
+seven
+eight
 context
+ten
+eleven
";

    fn request() -> WorkRequest {
        WorkRequest {
            org: "grafana".to_string(),
            repo: "repo".to_string(),
            workflow_run_id: 42,
        }
    }

    fn processor(forge: Arc<FakeForge>, storage: Arc<InMemoryStorage>) -> Processor {
        Processor::new(forge, storage)
    }

    fn baseline_key() -> CoverageKey {
        CoverageKey::new("grafana", "repo", "main")
    }

    // ─── Default-branch runs ───

    #[tokio::test]
    async fn default_branch_run_persists_merged_baseline() {
        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "main", "headsha00", &[])
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "coverage-unit".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[(
                        "coverage.out",
                        "mode: set\nexample.com/repo/pkg/f.go:1.1,3.2 1 1\n",
                    )]),
                )
                .with_artifact(
                    42,
                    Artifact {
                        id: 2,
                        name: "coverage-integration".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[(
                        "coverage.out",
                        "mode: set\nexample.com/repo/pkg/f.go:1.1,3.2 1 0\n",
                    )]),
                ),
        );
        let storage = Arc::new(InMemoryStorage::new());

        processor(forge.clone(), storage.clone())
            .process(&request())
            .await
            .unwrap();

        let blob = storage.get(&baseline_key()).await.unwrap().unwrap();
        assert_eq!(
            String::from_utf8(blob).unwrap(),
            "mode: set\nexample.com/repo/pkg/f.go:1.1,3.2 1 1\n"
        );

        // Default-branch runs touch neither check runs nor comments.
        assert!(forge.check_run_updates().is_empty());
        assert!(forge.comments(PrNumber(7)).is_empty());
    }

    #[tokio::test]
    async fn zero_artifacts_is_a_successful_no_op() {
        let forge = Arc::new(FakeForge::new("main").with_run(42, "main", "headsha00", &[]));
        let storage = Arc::new(InMemoryStorage::new());

        processor(forge, storage.clone())
            .process(&request())
            .await
            .unwrap();

        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn unparseable_artifact_is_skipped() {
        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "main", "headsha00", &[])
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "coverage-empty".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[("notes.txt", "no coverage here")]),
                ),
        );
        let storage = Arc::new(InMemoryStorage::new());

        processor(forge, storage.clone())
            .process(&request())
            .await
            .unwrap();

        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn non_coverage_artifacts_are_ignored() {
        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "main", "headsha00", &[])
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "build-logs".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[("coverage.out", "mode: set\nf.go:1.1,2.2 1 1\n")]),
                ),
        );
        let storage = Arc::new(InMemoryStorage::new());

        processor(forge.clone(), storage.clone())
            .process(&request())
            .await
            .unwrap();

        assert!(storage.is_empty().await);
        assert_eq!(forge.downloads(), 0);
    }

    // ─── Pull-request runs ───

    /// A PR run with one fully covered profile and no baseline.
    fn pr_forge_covered() -> FakeForge {
        FakeForge::new("main")
            .with_run(42, "pr/7", "headsha01", &[7])
            .with_pull_request(7, "headsha01", "main")
            .with_diff(7, DIFF_F_GO)
            .with_artifact(
                42,
                Artifact {
                    id: 1,
                    name: "coverage".to_string(),
                    size_in_bytes: 0,
                    expired: false,
                },
                zip_bytes(&[(
                    "coverage.out",
                    "mode: set\nexample.com/repo/pkg/f.go:5.1,7.10 3 1\n",
                )]),
            )
    }

    #[tokio::test]
    async fn pr_run_without_baseline_concludes_success() {
        let forge = Arc::new(pr_forge_covered());
        let storage = Arc::new(InMemoryStorage::new());

        processor(forge.clone(), storage.clone())
            .process(&request())
            .await
            .unwrap();

        let updates = forge.check_run_updates();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.conclusion, Some(CheckConclusion::Success));
        assert_eq!(update.status, Some(CheckStatus::Completed));
        let output = update.output.as_ref().unwrap();
        assert!(output.annotations.is_empty());
        assert_eq!(output.summary, "Project coverage 100.0%, change +100.0%");

        // Baseline untouched by PR runs.
        assert!(storage.is_empty().await);

        let comments = forge.comments(PrNumber(7));
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("| Base | 0.0% |"));
        assert!(comments[0].body.contains("| Head | 100.0% |"));
        assert!(comments[0].body.contains("**+100.0%**"));
    }

    #[tokio::test]
    async fn pr_run_with_uncovered_lines_annotates_and_fails() {
        // Four single-line blocks, all unexecuted. Added lines 5-8, 10, 11;
        // 8 and 11 are not instrumented.
        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "pr/7", "headsha01", &[7])
                .with_pull_request(7, "headsha01", "main")
                .with_diff(7, DIFF_F_GO)
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "coverage".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[(
                        "coverage.out",
                        "mode: set\n\
                         example.com/repo/pkg/f.go:5.1,5.10 1 0\n\
                         example.com/repo/pkg/f.go:6.1,6.10 1 0\n\
                         example.com/repo/pkg/f.go:7.1,7.10 1 0\n\
                         example.com/repo/pkg/f.go:10.1,10.10 1 0\n",
                    )]),
                ),
        );
        let storage = Arc::new(InMemoryStorage::new());
        // A covered baseline so the delta is negative.
        storage
            .put(&baseline_key(), b"mode: set\nexample.com/repo/pkg/g.go:1.1,2.2 4 1\n")
            .await
            .unwrap();

        processor(forge.clone(), storage)
            .process(&request())
            .await
            .unwrap();

        let updates = forge.check_run_updates();
        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.conclusion, Some(CheckConclusion::Failure));
        let output = update.output.as_ref().unwrap();
        assert_eq!(output.summary, "Project coverage 0.0%, change -100.0%");

        let annotations = &output.annotations;
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].path, "pkg/f.go");
        assert_eq!(annotations[0].start_line, 5);
        assert_eq!(annotations[0].end_line, 7);
        assert_eq!(annotations[0].title, "Uncovered lines");
        assert_eq!(annotations[0].level, AnnotationLevel::Notice);
        assert_eq!(annotations[1].start_line, 10);
        assert_eq!(annotations[1].end_line, 10);
        assert_eq!(annotations[1].title, "Uncovered line");
    }

    #[tokio::test]
    async fn annotations_are_batched_in_fifties() {
        // 120 uncovered single lines, alternating gaps so no ranges merge.
        let mut profile_text = String::from("mode: set\n");
        for i in 0..120u32 {
            let line = 2 * i + 1;
            profile_text.push_str(&format!(
                "example.com/repo/pkg/big.go:{line}.1,{line}.10 1 0\n"
            ));
        }
        let mut diff = String::from(
            "diff --git a/pkg/big.go b/pkg/big.go\n--- a/pkg/big.go\n+++ b/pkg/big.go\n@@ -0,0 +1,240 @@\n",
        );
        for _ in 0..240 {
            diff.push_str("+x\n");
        }

        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "pr/7", "headsha01", &[7])
                .with_pull_request(7, "headsha01", "main")
                .with_diff(7, &diff)
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "coverage".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[("coverage.out", &profile_text)]),
                ),
        );

        processor(forge.clone(), Arc::new(InMemoryStorage::new()))
            .process(&request())
            .await
            .unwrap();

        let updates = forge.check_run_updates();
        assert_eq!(updates.len(), 3);

        let sizes: Vec<usize> = updates
            .iter()
            .map(|u| u.output.as_ref().unwrap().annotations.len())
            .collect();
        assert_eq!(sizes, vec![50, 50, 20]);

        // Only the final call completes the run.
        assert_eq!(updates[0].conclusion, None);
        assert_eq!(updates[1].conclusion, None);
        assert!(updates[2].conclusion.is_some());
        assert_eq!(updates[2].status, Some(CheckStatus::Completed));

        // Order is preserved across batches.
        let first_lines: Vec<u32> = updates
            .iter()
            .flat_map(|u| u.output.as_ref().unwrap().annotations.iter())
            .map(|a| a.start_line)
            .collect();
        let mut sorted = first_lines.clone();
        sorted.sort_unstable();
        assert_eq!(first_lines, sorted);
    }

    #[tokio::test]
    async fn batch_count_boundaries() {
        for (count, expected_calls) in [(1usize, 1usize), (50, 1), (51, 2)] {
            let forge = Arc::new(FakeForge::new("main"));
            let storage = Arc::new(InMemoryStorage::new());
            let processor = Processor::new(forge.clone(), storage);

            let annotations: Vec<Annotation> = (0..count)
                .map(|i| Annotation {
                    path: "pkg/f.go".to_string(),
                    start_line: i as u32 + 1,
                    end_line: i as u32 + 1,
                    level: AnnotationLevel::Notice,
                    title: "Uncovered line".to_string(),
                    message: format!("Line {} is not covered by tests", i + 1),
                })
                .collect();
            let comparison = Comparison {
                base_pct: 0.0,
                head_pct: 0.0,
                delta_pct: 0.0,
                decreased: false,
            };

            processor
                .update_check_run_batched(
                    &RepoId::new("grafana", "repo"),
                    CheckRunId(1),
                    &annotations,
                    &comparison,
                )
                .await
                .unwrap();

            let updates = forge.check_run_updates();
            assert_eq!(updates.len(), expected_calls, "for {count} annotations");
            // Only the last call carries the conclusion.
            for update in &updates[..updates.len() - 1] {
                assert_eq!(update.conclusion, None);
            }
            assert!(updates.last().unwrap().conclusion.is_some());
        }
    }

    #[tokio::test]
    async fn reprocessing_edits_the_existing_comment() {
        let forge = Arc::new(pr_forge_covered());
        let storage = Arc::new(InMemoryStorage::new());
        let processor = processor(forge.clone(), storage);

        processor.process(&request()).await.unwrap();
        processor.process(&request()).await.unwrap();

        // Two runs, one comment: the second edit found the marker.
        let comments = forge.comments(PrNumber(7));
        assert_eq!(comments.len(), 1);

        // The check run is recreated per processing attempt.
        assert_eq!(forge.check_runs_created(), 2);
    }

    #[tokio::test]
    async fn pr_run_without_resolvable_pr_fails() {
        let forge = Arc::new(
            FakeForge::new("main")
                .with_run(42, "feature", "headsha01", &[])
                .with_artifact(
                    42,
                    Artifact {
                        id: 1,
                        name: "coverage".to_string(),
                        size_in_bytes: 0,
                        expired: false,
                    },
                    zip_bytes(&[("coverage.out", "mode: set\nf.go:1.1,2.2 1 1\n")]),
                ),
        );

        let result = processor(forge, Arc::new(InMemoryStorage::new()))
            .process(&request())
            .await;

        assert!(matches!(result, Err(ProcessError::NoPullRequest(RunId(42)))));
    }

    #[tokio::test]
    async fn corrupt_baseline_is_treated_as_absent() {
        let forge = Arc::new(pr_forge_covered());
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .put(&baseline_key(), b"this is not a profile")
            .await
            .unwrap();

        processor(forge.clone(), storage)
            .process(&request())
            .await
            .unwrap();

        let updates = forge.check_run_updates();
        let output = updates[0].output.as_ref().unwrap();
        assert_eq!(output.summary, "Project coverage 100.0%, change +100.0%");
    }
}
