//! Event filtering for the receiver.
//!
//! An event must be a completed workflow run, from an allow-listed
//! organisation, for an allow-listed workflow. These filters apply in both
//! validated and development (HMAC-disabled) modes.

use thiserror::Error;

use super::events::WorkflowRunEvent;

/// Why an event was filtered out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The run has not completed yet (e.g. `requested`, `in_progress`).
    #[error("workflow run action must be 'completed', got {0:?}")]
    InvalidAction(String),

    #[error("organization {0:?} is not allowed")]
    DisallowedOrg(String),

    #[error("workflow {0:?} is not allowed")]
    DisallowedWorkflow(String),
}

/// The receiver's allow-lists.
#[derive(Debug, Clone)]
pub struct EventFilter {
    allowed_orgs: Vec<String>,
    /// Empty means every workflow is allowed.
    allowed_workflows: Vec<String>,
}

impl EventFilter {
    pub fn new(allowed_orgs: Vec<String>, allowed_workflows: Vec<String>) -> Self {
        EventFilter {
            allowed_orgs,
            allowed_workflows,
        }
    }

    /// Checks an event against the filters, in order: action, org,
    /// workflow.
    pub fn check(&self, event: &WorkflowRunEvent) -> Result<(), FilterError> {
        if event.action != "completed" {
            return Err(FilterError::InvalidAction(event.action.clone()));
        }

        let org = &event.organization.login;
        if !self.allowed_orgs.iter().any(|allowed| allowed == org) {
            return Err(FilterError::DisallowedOrg(org.clone()));
        }

        let workflow = &event.workflow_run.name;
        if !self.allowed_workflows.is_empty()
            && !self.allowed_workflows.iter().any(|allowed| allowed == workflow)
        {
            return Err(FilterError::DisallowedWorkflow(workflow.clone()));
        }

        Ok(())
    }
}
