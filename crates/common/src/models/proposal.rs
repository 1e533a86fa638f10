//! Proposal model and status state machine
//!
//! Status is a closed enum with an explicit transition table. Everything
//! outside the table is rejected with `InvalidTransition`, so an illegal
//! status can be neither constructed nor reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Proposal lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    OnHold,
}

/// Actions a transition request may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Submit,
    Approve,
    Reject,
    Hold,
}

impl ProposalStatus {
    /// All states, for exhaustive checks
    pub const ALL: [ProposalStatus; 5] = [
        ProposalStatus::Draft,
        ProposalStatus::PendingApproval,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::PendingApproval => "pending_approval",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::OnHold => "on_hold",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "draft" => Ok(ProposalStatus::Draft),
            "pending_approval" => Ok(ProposalStatus::PendingApproval),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "on_hold" => Ok(ProposalStatus::OnHold),
            _ => Err(AppError::InvalidStoredValue {
                column: "status".into(),
                value: value.into(),
            }),
        }
    }

    /// No outgoing transitions from these states
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Approved | ProposalStatus::Rejected)
    }

    /// The transition table:
    ///
    /// | from             | action              | to                         |
    /// |------------------|---------------------|----------------------------|
    /// | draft            | submit              | pending_approval           |
    /// | pending_approval | approve/reject/hold | approved/rejected/on_hold  |
    /// | on_hold          | approve/reject/hold | approved/rejected/on_hold  |
    ///
    /// Everything else is `InvalidTransition` and leaves state unchanged.
    pub fn apply(self, action: ReviewAction) -> Result<ProposalStatus> {
        use ProposalStatus::*;
        use ReviewAction::*;

        let next = match (self, action) {
            (Draft, Submit) => PendingApproval,
            (PendingApproval, Approve) | (OnHold, Approve) => Approved,
            (PendingApproval, Reject) | (OnHold, Reject) => Rejected,
            (PendingApproval, Hold) | (OnHold, Hold) => OnHold,
            _ => {
                return Err(AppError::InvalidTransition {
                    from: self.as_str().into(),
                    action: action.as_str().into(),
                })
            }
        };
        Ok(next)
    }
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Submit => "submit",
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Hold => "hold",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "submit" => Ok(ReviewAction::Submit),
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            "hold" => Ok(ReviewAction::Hold),
            _ => Err(AppError::InvalidStoredValue {
                column: "action".into(),
                value: value.into(),
            }),
        }
    }
}

/// A proposal as stored; mutated only through the workflow engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub content: Option<String>,
    pub status: ProposalStatus,
    pub submitter_id: Uuid,
    pub submitter_message: Option<String>,
    /// Feedback from the most recent review transition
    pub admin_feedback: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
