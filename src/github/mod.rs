//! The forge client seam.
//!
//! The worker talks to the forge only through [`ForgeClient`], so tests can
//! script it and the octocrab-backed implementation stays in one place.

pub mod client;
pub mod error;

use async_trait::async_trait;
use bytes::Bytes;

use crate::coverage::Annotation;
use crate::types::{CheckRunId, CommentId, PrNumber, RepoId, RunId};

pub use client::OctocrabForge;
pub use error::{ForgeError, ForgeErrorKind};

/// Hard ceiling on annotations per check-run update call. The forge rejects
/// larger updates; the worker batches against this limit.
pub const MAX_ANNOTATIONS_PER_UPDATE: usize = 50;

/// Workflow-run metadata, as fetched from the forge.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: RunId,
    pub name: String,
    pub head_branch: String,
    pub head_sha: String,
    /// Pull requests the forge associates with the run. Empty for
    /// default-branch runs and for runs from forks.
    pub pull_requests: Vec<PrNumber>,
}

/// An uploaded workflow artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    pub size_in_bytes: u64,
    pub expired: bool,
}

/// The subset of pull-request state the worker needs.
#[derive(Debug, Clone)]
pub struct PullRequestInfo {
    pub number: PrNumber,
    pub head_sha: String,
    pub base_branch: String,
}

/// An issue comment, used to locate and edit the coverage report.
#[derive(Debug, Clone)]
pub struct IssueComment {
    pub id: CommentId,
    pub body: String,
}

/// Check-run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    InProgress,
    Completed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::InProgress => "in_progress",
            CheckStatus::Completed => "completed",
        }
    }
}

/// Check-run conclusion, set on the final update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckConclusion {
    Success,
    Failure,
}

impl CheckConclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckConclusion::Success => "success",
            CheckConclusion::Failure => "failure",
        }
    }
}

/// Output attached to a check-run update.
#[derive(Debug, Clone)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
    pub annotations: Vec<Annotation>,
}

/// One check-run update call.
#[derive(Debug, Clone, Default)]
pub struct CheckRunUpdate {
    pub status: Option<CheckStatus>,
    pub conclusion: Option<CheckConclusion>,
    pub output: Option<CheckRunOutput>,
}

/// Everything the pipeline needs from the forge.
///
/// Implementations must reject check-run updates carrying more than
/// [`MAX_ANNOTATIONS_PER_UPDATE`] annotations.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn get_workflow_run(&self, repo: &RepoId, run: RunId)
    -> Result<WorkflowRun, ForgeError>;

    async fn list_artifacts(&self, repo: &RepoId, run: RunId) -> Result<Vec<Artifact>, ForgeError>;

    /// Downloads an artifact as a zip archive.
    async fn download_artifact(&self, repo: &RepoId, artifact_id: u64)
    -> Result<Bytes, ForgeError>;

    async fn get_pull_request(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<PullRequestInfo, ForgeError>;

    /// Fetches the pull request's unified diff.
    async fn get_pull_request_diff(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<String, ForgeError>;

    async fn get_default_branch(&self, repo: &RepoId) -> Result<String, ForgeError>;

    /// Creates a check run on `head_sha` with in-progress status.
    async fn create_check_run(
        &self,
        repo: &RepoId,
        name: &str,
        head_sha: &str,
    ) -> Result<CheckRunId, ForgeError>;

    async fn update_check_run(
        &self,
        repo: &RepoId,
        check_run: CheckRunId,
        update: CheckRunUpdate,
    ) -> Result<(), ForgeError>;

    async fn list_issue_comments(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<IssueComment>, ForgeError>;

    async fn create_issue_comment(
        &self,
        repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<CommentId, ForgeError>;

    async fn update_issue_comment(
        &self,
        repo: &RepoId,
        comment: CommentId,
        body: &str,
    ) -> Result<(), ForgeError>;
}
