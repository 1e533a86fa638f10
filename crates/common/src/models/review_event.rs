//! Review event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::proposal::{ProposalStatus, ReviewAction};

/// Immutable audit record of one proposal transition. Ids are UUIDv7 so
/// insertion order and id order agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub actor_id: Uuid,
    pub action: ReviewAction,
    pub from_status: ProposalStatus,
    pub to_status: ProposalStatus,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewEvent {
    pub fn record(
        proposal_id: Uuid,
        actor_id: Uuid,
        action: ReviewAction,
        from_status: ProposalStatus,
        to_status: ProposalStatus,
        feedback: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            proposal_id,
            actor_id,
            action,
            from_status,
            to_status,
            feedback,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_time_ordered() {
        let pid = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let now = Utc::now();
        let a = ReviewEvent::record(
            pid, actor, ReviewAction::Submit,
            ProposalStatus::Draft, ProposalStatus::PendingApproval,
            None, now,
        );
        let b = ReviewEvent::record(
            pid, actor, ReviewAction::Approve,
            ProposalStatus::PendingApproval, ProposalStatus::Approved,
            None, now,
        );
        assert!(a.id < b.id);
    }
}
