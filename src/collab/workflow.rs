//! Document approval workflow
//!
//! A single-step approval state machine. Approval actions need the
//! `approve` capability; lock/unlock of the whole document is an
//! administrative operation. Editing additionally needs the block lock,
//! which the session checks before asking [`Workflow::can_edit`].

use serde::{Deserialize, Serialize};

use crate::authz::{AuthorizationDirectory, Capability};
use crate::error::{CollabError, CollabResult};
use crate::models::WorkflowStatus;

/// Decision carried by an `approve` message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject,
    RequestChanges,
}

impl ApprovalAction {
    pub fn target(&self) -> WorkflowStatus {
        match self {
            ApprovalAction::Approve => WorkflowStatus::Approved,
            ApprovalAction::Reject => WorkflowStatus::Rejected,
            ApprovalAction::RequestChanges => WorkflowStatus::RevisionRequested,
        }
    }
}

/// Whether the workflow allows moving directly from `from` to `to`
pub fn can_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    use WorkflowStatus::*;

    matches!(
        (from, to),
        (Draft, RevisionRequested)
            | (Draft, Approved)
            | (Draft, Rejected)
            | (Draft, Locked)
            | (RevisionRequested, Approved)
            | (RevisionRequested, Rejected)
            | (RevisionRequested, Locked)
            | (Locked, Draft)
    )
}

/// Status change applied by the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
}

#[derive(Debug, Clone, Default)]
pub struct Workflow {
    status: WorkflowStatus,
}

impl Workflow {
    pub fn new(status: WorkflowStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    /// Apply an approval decision made by someone holding `role`
    pub fn apply(
        &mut self,
        action: ApprovalAction,
        role: &str,
        directory: &dyn AuthorizationDirectory,
    ) -> CollabResult<Transition> {
        if !directory.has_capability(role, Capability::Approve) {
            return Err(CollabError::Unauthorized(format!(
                "role '{}' cannot approve",
                role
            )));
        }
        self.transition_to(action.target())
    }

    /// Freeze the document against all edits
    pub fn lock_document(&mut self) -> CollabResult<Transition> {
        self.transition_to(WorkflowStatus::Locked)
    }

    pub fn unlock_document(&mut self) -> CollabResult<Transition> {
        self.transition_to(WorkflowStatus::Draft)
    }

    fn transition_to(&mut self, to: WorkflowStatus) -> CollabResult<Transition> {
        let from = self.status;
        if !can_transition(from, to) {
            return Err(CollabError::InvalidTransition { from, to });
        }
        self.status = to;
        tracing::info!(from = %from, to = %to, "Workflow status changed");
        Ok(Transition { from, to })
    }

    /// Editing needs an editable status, the block lock, and a role allowed
    /// to edit in the current status.
    pub fn can_edit(
        &self,
        role: &str,
        holds_lock: bool,
        directory: &dyn AuthorizationDirectory,
    ) -> bool {
        self.status.is_editable() && holds_lock && directory.can_edit_in(role, self.status)
    }
}
