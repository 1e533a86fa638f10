//! Workflow engine
//!
//! Validates requested actions against the status state machine before
//! handing the persisted check-and-set to the store. At most one
//! in-flight transition per proposal wins; the loser surfaces
//! `ConcurrentModification` and may re-read and retry.

use tracing::{info, instrument};
use uuid::Uuid;

use presail_common::errors::{AppError, Result};
use presail_common::metrics::{PROPOSAL_TRANSITIONS, TRANSITION_CONFLICTS};
use presail_common::models::{Proposal, ProposalStatus, ReviewAction, ReviewEvent};

use crate::store::{NewProposal, WorkflowStore};

#[derive(Clone)]
pub struct WorkflowEngine {
    store: WorkflowStore,
}

impl WorkflowEngine {
    pub fn new(store: WorkflowStore) -> Self {
        Self { store }
    }

    pub async fn create_draft(&self, new: NewProposal) -> Result<Proposal> {
        let proposal = self.store.create(&new).await?;
        info!(proposal_id = %proposal.id, "Proposal draft created");
        Ok(proposal)
    }

    /// Draft to pending_approval, with an optional submitter message
    #[instrument(skip(self, message), fields(%id, %actor_id))]
    pub async fn submit(
        &self,
        id: Uuid,
        actor_id: Uuid,
        message: Option<String>,
    ) -> Result<Proposal> {
        self.transition(id, ReviewAction::Submit, actor_id, message)
            .await
    }

    /// Approve, reject or hold a submitted proposal. `Submit` is not a
    /// review action and is rejected before touching the state machine.
    #[instrument(skip(self, feedback), fields(%id, %actor_id, action = action.as_str()))]
    pub async fn review(
        &self,
        id: Uuid,
        actor_id: Uuid,
        action: ReviewAction,
        feedback: Option<String>,
    ) -> Result<Proposal> {
        if action == ReviewAction::Submit {
            return Err(AppError::Validation {
                message: "submit is not a review action, use the submit endpoint".into(),
                field: Some("action".into()),
            });
        }
        self.transition(id, action, actor_id, feedback).await
    }

    pub async fn get(&self, id: Uuid) -> Result<(Proposal, Vec<ReviewEvent>)> {
        let proposal = self.store.get(id).await?;
        let events = self.store.events(id).await?;
        Ok((proposal, events))
    }

    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        self.store.list(status).await
    }

    async fn transition(
        &self,
        id: Uuid,
        action: ReviewAction,
        actor_id: Uuid,
        feedback: Option<String>,
    ) -> Result<Proposal> {
        let current = self.store.get(id).await?;

        // Fail fast on illegal actions; the store re-checks the status
        // under the transaction and reports races.
        current.status.apply(action)?;

        let result = self
            .store
            .transition(id, current.status, action, actor_id, feedback)
            .await;

        match &result {
            Ok((proposal, event)) => {
                metrics::counter!(PROPOSAL_TRANSITIONS).increment(1);
                info!(
                    proposal_id = %id,
                    from = event.from_status.as_str(),
                    to = proposal.status.as_str(),
                    action = action.as_str(),
                    "Proposal transition applied"
                );
            }
            Err(AppError::ConcurrentModification { .. }) => {
                metrics::counter!(TRANSITION_CONFLICTS).increment(1);
            }
            Err(_) => {}
        }

        result.map(|(proposal, _)| proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::store::tests::{draft, temp_store};

    async fn engine(dir: &tempfile::TempDir) -> WorkflowEngine {
        WorkflowEngine::new(temp_store(dir).await)
    }

    #[tokio::test]
    async fn test_hold_then_approve_records_ordered_events() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir).await;
        let submitter = Uuid::new_v4();
        let reviewer = Uuid::new_v4();

        let proposal = engine.create_draft(draft("Acme renewal")).await.unwrap();

        let proposal = engine.submit(proposal.id, submitter, None).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::PendingApproval);

        let proposal = engine
            .review(
                proposal.id,
                reviewer,
                ReviewAction::Hold,
                Some("needs budget detail".into()),
            )
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::OnHold);
        assert_eq!(proposal.admin_feedback.as_deref(), Some("needs budget detail"));

        let proposal = engine
            .review(proposal.id, reviewer, ReviewAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert!(proposal.reviewed_at.is_some());

        let (_, events) = engine.get(proposal.id).await.unwrap();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![ReviewAction::Submit, ReviewAction::Hold, ReviewAction::Approve]
        );
        assert_eq!(events[1].feedback.as_deref(), Some("needs budget detail"));
    }

    #[tokio::test]
    async fn test_submitting_twice_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir).await;
        let actor = Uuid::new_v4();

        let proposal = engine.create_draft(draft("Acme renewal")).await.unwrap();
        engine.submit(proposal.id, actor, None).await.unwrap();

        let err = engine.submit(proposal.id, actor, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reviewing_a_draft_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir).await;

        let proposal = engine.create_draft(draft("Acme renewal")).await.unwrap();
        let err = engine
            .review(proposal.id, Uuid::new_v4(), ReviewAction::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_submit_is_not_a_review_action() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir).await;

        let proposal = engine.create_draft(draft("Acme renewal")).await.unwrap();
        let err = engine
            .review(proposal.id, Uuid::new_v4(), ReviewAction::Submit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_leave_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine(&dir).await);
        let actor = Uuid::new_v4();

        let proposal = engine.create_draft(draft("Acme renewal")).await.unwrap();
        engine.submit(proposal.id, actor, None).await.unwrap();

        let a = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .review(proposal.id, Uuid::new_v4(), ReviewAction::Approve, None)
                    .await
            })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .review(proposal.id, Uuid::new_v4(), ReviewAction::Approve, None)
                    .await
            })
        };

        let results = vec![a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1, "exactly one approve may land");
        for result in &results {
            if let Err(err) = result {
                assert!(matches!(
                    err,
                    AppError::ConcurrentModification { .. } | AppError::InvalidTransition { .. }
                ));
            }
        }

        let (proposal, events) = engine.get(proposal.id).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        let approvals = events
            .iter()
            .filter(|e| e.action == ReviewAction::Approve)
            .count();
        assert_eq!(approvals, 1);
    }
}
