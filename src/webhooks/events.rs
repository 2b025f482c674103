//! Workflow-run webhook payload types.
//!
//! Only the fields the receiver needs are modelled; the worker re-fetches
//! authoritative state from the forge.

use serde::Deserialize;

/// A `workflow_run` webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunEvent {
    #[serde(default)]
    pub action: String,
    pub workflow_run: WorkflowRunInfo,
    pub repository: RepositoryInfo,
    pub organization: OrganizationInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunInfo {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationInfo {
    pub login: String,
}

/// Parses a raw webhook body into a workflow-run event.
pub fn parse_event(body: &[u8]) -> Result<WorkflowRunEvent, serde_json::Error> {
    serde_json::from_slice(body)
}
