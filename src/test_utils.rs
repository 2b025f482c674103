//! Shared test helpers: profile generators, zip construction, and a
//! scripted forge double.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;

use crate::coverage::{Block, Mode, Profile};
use crate::github::{
    Artifact, CheckRunUpdate, ForgeClient, ForgeError, IssueComment, MAX_ANNOTATIONS_PER_UPDATE,
    PullRequestInfo, WorkflowRun,
};
use crate::types::{CheckRunId, CommentId, PrNumber, RepoId, RunId};

/// Strategy for a structurally valid coverage block.
pub fn arb_block() -> impl Strategy<Value = Block> {
    (1u32..500, 1u32..80, 0u32..20, 1u32..80, 0u64..50, 0u64..10).prop_map(
        |(sl, sc, extra, ec, n, c)| Block {
            start_line: sl,
            start_col: sc,
            end_line: sl + extra,
            end_col: ec,
            num_stmt: n,
            count: c,
        },
    )
}

/// Strategy for a batch of profiles with distinct module-qualified file
/// names, all under one mode.
pub fn arb_profiles(mode: Mode) -> impl Strategy<Value = Vec<Profile>> {
    proptest::collection::btree_map(
        "[a-z]{1,8}\\.go",
        proptest::collection::vec(arb_block(), 1..8),
        1..4,
    )
    .prop_map(move |files| {
        files
            .into_iter()
            .map(|(name, blocks)| Profile {
                file_name: format!("example.com/pkg/{name}"),
                mode: mode.clone(),
                blocks,
            })
            .collect()
    })
}

/// Builds an in-memory zip archive from `(entry name, contents)` pairs.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options: zip::write::SimpleFileOptions = Default::default();

    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// A scripted `ForgeClient` recording every mutation.
///
/// Reads are served from fixtures installed through the builder methods;
/// writes are captured for assertions.
#[derive(Debug, Default)]
pub struct FakeForge {
    default_branch: String,
    runs: HashMap<u64, WorkflowRun>,
    artifacts: HashMap<u64, Vec<Artifact>>,
    archives: HashMap<u64, Vec<u8>>,
    pull_requests: HashMap<u64, PullRequestInfo>,
    diffs: HashMap<u64, String>,

    state: Mutex<FakeForgeState>,
}

#[derive(Debug, Default)]
struct FakeForgeState {
    downloads: usize,
    check_runs_created: usize,
    check_run_updates: Vec<CheckRunUpdate>,
    comments: HashMap<u64, Vec<IssueComment>>,
    next_comment_id: u64,
}

impl FakeForge {
    pub fn new(default_branch: impl Into<String>) -> Self {
        FakeForge {
            default_branch: default_branch.into(),
            ..FakeForge::default()
        }
    }

    pub fn with_run(mut self, id: u64, head_branch: &str, head_sha: &str, prs: &[u64]) -> Self {
        self.runs.insert(
            id,
            WorkflowRun {
                id: RunId(id),
                name: "ci.yml".to_string(),
                head_branch: head_branch.to_string(),
                head_sha: head_sha.to_string(),
                pull_requests: prs.iter().copied().map(PrNumber).collect(),
            },
        );
        self
    }

    pub fn with_artifact(mut self, run_id: u64, artifact: Artifact, archive: Vec<u8>) -> Self {
        self.archives.insert(artifact.id, archive);
        self.artifacts.entry(run_id).or_default().push(artifact);
        self
    }

    pub fn with_pull_request(mut self, number: u64, head_sha: &str, base_branch: &str) -> Self {
        self.pull_requests.insert(
            number,
            PullRequestInfo {
                number: PrNumber(number),
                head_sha: head_sha.to_string(),
                base_branch: base_branch.to_string(),
            },
        );
        self
    }

    pub fn with_diff(mut self, number: u64, diff: &str) -> Self {
        self.diffs.insert(number, diff.to_string());
        self
    }

    // Assertion accessors.

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }

    pub fn check_runs_created(&self) -> usize {
        self.state.lock().unwrap().check_runs_created
    }

    pub fn check_run_updates(&self) -> Vec<CheckRunUpdate> {
        self.state.lock().unwrap().check_run_updates.clone()
    }

    pub fn comments(&self, number: PrNumber) -> Vec<IssueComment> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&number.0)
            .cloned()
            .unwrap_or_default()
    }

    fn not_found(what: impl std::fmt::Display) -> ForgeError {
        ForgeError::invalid(format!("fixture not installed: {what}"))
    }
}

#[async_trait]
impl ForgeClient for FakeForge {
    async fn get_workflow_run(
        &self,
        _repo: &RepoId,
        run: RunId,
    ) -> Result<WorkflowRun, ForgeError> {
        self.runs
            .get(&run.0)
            .cloned()
            .ok_or_else(|| Self::not_found(format!("run {run}")))
    }

    async fn list_artifacts(&self, _repo: &RepoId, run: RunId) -> Result<Vec<Artifact>, ForgeError> {
        Ok(self.artifacts.get(&run.0).cloned().unwrap_or_default())
    }

    async fn download_artifact(
        &self,
        _repo: &RepoId,
        artifact_id: u64,
    ) -> Result<Bytes, ForgeError> {
        self.state.lock().unwrap().downloads += 1;
        self.archives
            .get(&artifact_id)
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| Self::not_found(format!("artifact {artifact_id}")))
    }

    async fn get_pull_request(
        &self,
        _repo: &RepoId,
        number: PrNumber,
    ) -> Result<PullRequestInfo, ForgeError> {
        self.pull_requests
            .get(&number.0)
            .cloned()
            .ok_or_else(|| Self::not_found(format!("pull request {number}")))
    }

    async fn get_pull_request_diff(
        &self,
        _repo: &RepoId,
        number: PrNumber,
    ) -> Result<String, ForgeError> {
        self.diffs
            .get(&number.0)
            .cloned()
            .ok_or_else(|| Self::not_found(format!("diff for {number}")))
    }

    async fn get_default_branch(&self, _repo: &RepoId) -> Result<String, ForgeError> {
        Ok(self.default_branch.clone())
    }

    async fn create_check_run(
        &self,
        _repo: &RepoId,
        _name: &str,
        _head_sha: &str,
    ) -> Result<CheckRunId, ForgeError> {
        let mut state = self.state.lock().unwrap();
        state.check_runs_created += 1;
        Ok(CheckRunId(state.check_runs_created as u64))
    }

    async fn update_check_run(
        &self,
        _repo: &RepoId,
        _check_run: CheckRunId,
        update: CheckRunUpdate,
    ) -> Result<(), ForgeError> {
        if let Some(output) = &update.output
            && output.annotations.len() > MAX_ANNOTATIONS_PER_UPDATE
        {
            return Err(ForgeError::invalid("too many annotations in one update"));
        }
        self.state.lock().unwrap().check_run_updates.push(update);
        Ok(())
    }

    async fn list_issue_comments(
        &self,
        _repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<IssueComment>, ForgeError> {
        Ok(self.comments(number))
    }

    async fn create_issue_comment(
        &self,
        _repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<CommentId, ForgeError> {
        let mut state = self.state.lock().unwrap();
        state.next_comment_id += 1;
        let id = CommentId(state.next_comment_id);
        state
            .comments
            .entry(number.0)
            .or_default()
            .push(IssueComment {
                id,
                body: body.to_string(),
            });
        Ok(id)
    }

    async fn update_issue_comment(
        &self,
        _repo: &RepoId,
        comment: CommentId,
        body: &str,
    ) -> Result<(), ForgeError> {
        let mut state = self.state.lock().unwrap();
        for comments in state.comments.values_mut() {
            if let Some(existing) = comments.iter_mut().find(|c| c.id == comment) {
                existing.body = body.to_string();
                return Ok(());
            }
        }
        Err(Self::not_found(format!("comment {comment}")))
    }
}
