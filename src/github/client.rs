//! Octocrab-backed forge client.
//!
//! Uses octocrab's typed endpoints where they exist and raw routes with
//! local wire structs for the actions and checks endpoints, which keeps the
//! request bodies exactly at the documented REST shapes.

use async_trait::async_trait;
use bytes::Bytes;
use octocrab::Octocrab;
use octocrab::models::{AppId, InstallationId};
use octocrab::params::actions::ArchiveFormat;
use serde::{Deserialize, Serialize};

use crate::coverage::Annotation;
use crate::types::{CheckRunId, CommentId, PrNumber, RepoId, RunId};

use super::error::ForgeError;
use super::{
    Artifact, CheckRunUpdate, CheckStatus, ForgeClient, IssueComment,
    MAX_ANNOTATIONS_PER_UPDATE, PullRequestInfo, WorkflowRun,
};

/// A `ForgeClient` backed by octocrab.
#[derive(Clone)]
pub struct OctocrabForge {
    client: Octocrab,
}

impl OctocrabForge {
    /// Authenticates as a forge app installation. `private_key` is the
    /// app's PEM-encoded RSA key.
    pub fn from_app(
        app_id: u64,
        installation_id: u64,
        private_key: &str,
    ) -> Result<Self, ForgeError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| ForgeError::invalid(format!("invalid app private key: {e}")))?;

        let app_client = Octocrab::builder()
            .app(AppId(app_id), key)
            .build()
            .map_err(ForgeError::from_octocrab)?;
        let client = app_client
            .installation(InstallationId(installation_id))
            .map_err(|e| ForgeError::invalid(format!("installation auth failed: {e}")))?;

        Ok(OctocrabForge { client })
    }

    /// Authenticates with a personal token. Useful for development.
    pub fn from_token(token: impl Into<String>) -> Result<Self, ForgeError> {
        let client = Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(ForgeError::from_octocrab)?;
        Ok(OctocrabForge { client })
    }

    /// Wraps a pre-configured octocrab instance.
    pub fn from_octocrab(client: Octocrab) -> Self {
        OctocrabForge { client }
    }
}

impl std::fmt::Debug for OctocrabForge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabForge").finish_non_exhaustive()
    }
}

// Wire structs for the raw routes.

#[derive(Debug, Deserialize)]
struct RunWire {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    head_branch: String,
    #[serde(default)]
    head_sha: String,
    #[serde(default)]
    pull_requests: Vec<PrRefWire>,
}

#[derive(Debug, Deserialize)]
struct PrRefWire {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct ArtifactListWire {
    artifacts: Vec<ArtifactWire>,
}

#[derive(Debug, Deserialize)]
struct ArtifactWire {
    id: u64,
    name: String,
    #[serde(default)]
    size_in_bytes: u64,
    #[serde(default)]
    expired: bool,
}

#[derive(Debug, Deserialize)]
struct PullRequestWire {
    head: RefWire,
    base: RefWire,
}

#[derive(Debug, Deserialize)]
struct RefWire {
    #[serde(default)]
    sha: String,
    #[serde(rename = "ref", default)]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryWire {
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunWire {
    id: u64,
}

#[derive(Debug, Serialize)]
struct CreateCheckRunBody<'a> {
    name: &'a str,
    head_sha: &'a str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct UpdateCheckRunBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conclusion: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<OutputBody>,
}

#[derive(Debug, Serialize)]
struct OutputBody {
    title: String,
    summary: String,
    annotations: Vec<AnnotationBody>,
}

#[derive(Debug, Serialize)]
struct AnnotationBody {
    path: String,
    start_line: u32,
    end_line: u32,
    annotation_level: &'static str,
    title: String,
    message: String,
}

impl From<&Annotation> for AnnotationBody {
    fn from(a: &Annotation) -> Self {
        AnnotationBody {
            path: a.path.clone(),
            start_line: a.start_line,
            end_line: a.end_line,
            annotation_level: a.level.as_str(),
            title: a.title.clone(),
            message: a.message.clone(),
        }
    }
}

#[async_trait]
impl ForgeClient for OctocrabForge {
    async fn get_workflow_run(
        &self,
        repo: &RepoId,
        run: RunId,
    ) -> Result<WorkflowRun, ForgeError> {
        let route = format!("/repos/{}/{}/actions/runs/{}", repo.owner, repo.repo, run);
        let wire: RunWire = self.client.get(route, None::<&()>).await?;

        Ok(WorkflowRun {
            id: RunId(wire.id),
            name: wire.name,
            head_branch: wire.head_branch,
            head_sha: wire.head_sha,
            pull_requests: wire.pull_requests.iter().map(|p| PrNumber(p.number)).collect(),
        })
    }

    async fn list_artifacts(&self, repo: &RepoId, run: RunId) -> Result<Vec<Artifact>, ForgeError> {
        let route = format!(
            "/repos/{}/{}/actions/runs/{}/artifacts",
            repo.owner, repo.repo, run
        );
        let wire: ArtifactListWire = self.client.get(route, None::<&()>).await?;

        Ok(wire
            .artifacts
            .into_iter()
            .map(|a| Artifact {
                id: a.id,
                name: a.name,
                size_in_bytes: a.size_in_bytes,
                expired: a.expired,
            })
            .collect())
    }

    async fn download_artifact(
        &self,
        repo: &RepoId,
        artifact_id: u64,
    ) -> Result<Bytes, ForgeError> {
        let bytes = self
            .client
            .actions()
            .download_artifact(
                &repo.owner,
                &repo.repo,
                artifact_id.into(),
                ArchiveFormat::Zip,
            )
            .await?;
        Ok(bytes)
    }

    async fn get_pull_request(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<PullRequestInfo, ForgeError> {
        let route = format!("/repos/{}/{}/pulls/{}", repo.owner, repo.repo, number.0);
        let wire: PullRequestWire = self.client.get(route, None::<&()>).await?;

        Ok(PullRequestInfo {
            number,
            head_sha: wire.head.sha,
            base_branch: wire.base.ref_name,
        })
    }

    async fn get_pull_request_diff(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<String, ForgeError> {
        let diff = self
            .client
            .pulls(&repo.owner, &repo.repo)
            .get_diff(number.0)
            .await?;
        Ok(diff)
    }

    async fn get_default_branch(&self, repo: &RepoId) -> Result<String, ForgeError> {
        let route = format!("/repos/{}/{}", repo.owner, repo.repo);
        let wire: RepositoryWire = self.client.get(route, None::<&()>).await?;

        wire.default_branch
            .ok_or_else(|| ForgeError::invalid(format!("{repo} has no default branch")))
    }

    async fn create_check_run(
        &self,
        repo: &RepoId,
        name: &str,
        head_sha: &str,
    ) -> Result<CheckRunId, ForgeError> {
        let route = format!("/repos/{}/{}/check-runs", repo.owner, repo.repo);
        let body = CreateCheckRunBody {
            name,
            head_sha,
            status: CheckStatus::InProgress.as_str(),
        };
        let wire: CheckRunWire = self.client.post(route, Some(&body)).await?;

        Ok(CheckRunId(wire.id))
    }

    async fn update_check_run(
        &self,
        repo: &RepoId,
        check_run: CheckRunId,
        update: CheckRunUpdate,
    ) -> Result<(), ForgeError> {
        if let Some(output) = &update.output
            && output.annotations.len() > MAX_ANNOTATIONS_PER_UPDATE
        {
            return Err(ForgeError::invalid(format!(
                "check-run update carries {} annotations, limit is {}",
                output.annotations.len(),
                MAX_ANNOTATIONS_PER_UPDATE
            )));
        }

        let route = format!(
            "/repos/{}/{}/check-runs/{}",
            repo.owner, repo.repo, check_run
        );
        let body = UpdateCheckRunBody {
            status: update.status.map(|s| s.as_str()),
            conclusion: update.conclusion.map(|c| c.as_str()),
            output: update.output.map(|o| OutputBody {
                title: o.title,
                summary: o.summary,
                annotations: o.annotations.iter().map(AnnotationBody::from).collect(),
            }),
        };
        let _: CheckRunWire = self.client.patch(route, Some(&body)).await?;

        Ok(())
    }

    async fn list_issue_comments(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Vec<IssueComment>, ForgeError> {
        let page = self
            .client
            .issues(&repo.owner, &repo.repo)
            .list_comments(number.0)
            .per_page(100)
            .send()
            .await?;

        Ok(page
            .items
            .into_iter()
            .map(|c| IssueComment {
                id: CommentId(c.id.0),
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoId,
        number: PrNumber,
        body: &str,
    ) -> Result<CommentId, ForgeError> {
        let comment = self
            .client
            .issues(&repo.owner, &repo.repo)
            .create_comment(number.0, body)
            .await?;
        Ok(CommentId(comment.id.0))
    }

    async fn update_issue_comment(
        &self,
        repo: &RepoId,
        comment: CommentId,
        body: &str,
    ) -> Result<(), ForgeError> {
        self.client
            .issues(&repo.owner, &repo.repo)
            .update_comment(octocrab::models::CommentId(comment.0), body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::AnnotationLevel;

    #[test]
    fn update_body_skips_absent_fields() {
        let body = UpdateCheckRunBody {
            status: Some("completed"),
            conclusion: None,
            output: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"status": "completed"}));
    }

    #[test]
    fn annotation_body_shape() {
        let annotation = Annotation {
            path: "pkg/f.go".to_string(),
            start_line: 5,
            end_line: 7,
            level: AnnotationLevel::Notice,
            title: "Uncovered lines".to_string(),
            message: "Lines 5-7 are not covered by tests".to_string(),
        };

        let json = serde_json::to_value(AnnotationBody::from(&annotation)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "pkg/f.go",
                "start_line": 5,
                "end_line": 7,
                "annotation_level": "notice",
                "title": "Uncovered lines",
                "message": "Lines 5-7 are not covered by tests"
            })
        );
    }
}
