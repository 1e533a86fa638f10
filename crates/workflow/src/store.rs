//! Proposal persistence
//!
//! Proposals are never hard-deleted. Status changes go through a single
//! check-and-set `transition` that updates the row only while it still
//! holds the expected status and appends the audit event in the same
//! transaction, so a half-written status+event pair cannot be observed.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use presail_common::db::DbPool;
use presail_common::errors::{AppError, Result};
use presail_common::models::{Proposal, ProposalStatus, ReviewAction, ReviewEvent};

/// Fields supplied when a draft is created
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub project_id: Option<Uuid>,
    pub title: String,
    pub content: Option<String>,
    pub submitter_id: Uuid,
}

#[derive(Clone)]
pub struct WorkflowStore {
    pool: DbPool,
}

impl WorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new proposal in `draft`
    pub async fn create(&self, new: &NewProposal) -> Result<Proposal> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO proposals (id, project_id, title, content, status, submitter_id,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, 'draft', ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(new.project_id.map(|p| p.to_string()))
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.submitter_id.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Proposal> {
        let row = sqlx::query("SELECT * FROM proposals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::ProposalNotFound { id: id.to_string() })?;
        proposal_from_row(row)
    }

    /// Admin listing: submitted proposals newest first, drafts last
    pub async fn list(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>> {
        let mut sql = String::from("SELECT * FROM proposals");
        if status.is_some() {
            sql.push_str(" WHERE status = ?");
        }
        sql.push_str(" ORDER BY submitted_at IS NULL, submitted_at DESC, created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(proposal_from_row).collect()
    }

    /// Audit trail of one proposal in insertion order
    pub async fn events(&self, proposal_id: Uuid) -> Result<Vec<ReviewEvent>> {
        let rows = sqlx::query("SELECT * FROM review_events WHERE proposal_id = ? ORDER BY id")
            .bind(proposal_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Every proposal, for analytics recomputation
    pub async fn all(&self) -> Result<Vec<Proposal>> {
        let rows = sqlx::query("SELECT * FROM proposals")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(proposal_from_row).collect()
    }

    /// The full event log in insertion order, for analytics recomputation
    pub async fn all_events(&self) -> Result<Vec<ReviewEvent>> {
        let rows = sqlx::query("SELECT * FROM review_events ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Check-and-set transition. The row is updated only while it still
    /// holds `expected_from`; zero affected rows means another request
    /// moved the proposal first and the loser gets
    /// `ConcurrentModification`. The audit event commits with the status
    /// change or not at all.
    pub async fn transition(
        &self,
        id: Uuid,
        expected_from: ProposalStatus,
        action: ReviewAction,
        actor_id: Uuid,
        feedback: Option<String>,
    ) -> Result<(Proposal, ReviewEvent)> {
        let to = expected_from.apply(action)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let updated = match action {
            ReviewAction::Submit => {
                sqlx::query(
                    r#"
                    UPDATE proposals
                    SET status = ?, submitted_at = ?, submitter_message = ?, updated_at = ?
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(to.as_str())
                .bind(now)
                .bind(&feedback)
                .bind(now)
                .bind(id.to_string())
                .bind(expected_from.as_str())
                .execute(&mut *tx)
                .await?
            }
            ReviewAction::Approve | ReviewAction::Reject | ReviewAction::Hold => {
                // Feedback is optional; absent feedback keeps the last one
                sqlx::query(
                    r#"
                    UPDATE proposals
                    SET status = ?, reviewed_at = ?, reviewed_by = ?,
                        admin_feedback = COALESCE(?, admin_feedback), updated_at = ?
                    WHERE id = ? AND status = ?
                    "#,
                )
                .bind(to.as_str())
                .bind(now)
                .bind(actor_id.to_string())
                .bind(&feedback)
                .bind(now)
                .bind(id.to_string())
                .bind(expected_from.as_str())
                .execute(&mut *tx)
                .await?
            }
        };

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::ConcurrentModification { id: id.to_string() });
        }

        let event = ReviewEvent::record(id, actor_id, action, expected_from, to, feedback, now);
        sqlx::query(
            r#"
            INSERT INTO review_events (id, proposal_id, actor_id, action,
                                       from_status, to_status, feedback, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.proposal_id.to_string())
        .bind(event.actor_id.to_string())
        .bind(event.action.as_str())
        .bind(event.from_status.as_str())
        .bind(event.to_status.as_str())
        .bind(&event.feedback)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let proposal = self.get(id).await?;
        Ok((proposal, event))
    }
}

fn proposal_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Proposal> {
    let id: String = row.try_get("id")?;
    let project_id: Option<String> = row.try_get("project_id")?;
    let status: String = row.try_get("status")?;
    let submitter_id: String = row.try_get("submitter_id")?;
    let reviewed_by: Option<String> = row.try_get("reviewed_by")?;

    Ok(Proposal {
        id: parse_uuid(&id, "id")?,
        project_id: project_id
            .map(|p| parse_uuid(&p, "project_id"))
            .transpose()?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        status: ProposalStatus::parse(&status)?,
        submitter_id: parse_uuid(&submitter_id, "submitter_id")?,
        submitter_message: row.try_get("submitter_message")?,
        admin_feedback: row.try_get("admin_feedback")?,
        submitted_at: row.try_get("submitted_at")?,
        reviewed_at: row.try_get("reviewed_at")?,
        reviewed_by: reviewed_by
            .map(|r| parse_uuid(&r, "reviewed_by"))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ReviewEvent> {
    let id: String = row.try_get("id")?;
    let proposal_id: String = row.try_get("proposal_id")?;
    let actor_id: String = row.try_get("actor_id")?;
    let action: String = row.try_get("action")?;
    let from_status: String = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(ReviewEvent {
        id: parse_uuid(&id, "id")?,
        proposal_id: parse_uuid(&proposal_id, "proposal_id")?,
        actor_id: parse_uuid(&actor_id, "actor_id")?,
        action: ReviewAction::parse(&action)?,
        from_status: ProposalStatus::parse(&from_status)?,
        to_status: ProposalStatus::parse(&to_status)?,
        feedback: row.try_get("feedback")?,
        created_at,
    })
}

fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|_| AppError::InvalidStoredValue {
        column: column.into(),
        value: value.into(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use presail_common::config::DatabaseConfig;
    use presail_common::db;

    pub(crate) async fn temp_store(dir: &tempfile::TempDir) -> WorkflowStore {
        let cfg = DatabaseConfig {
            path: dir.path().join("w.db").to_string_lossy().into_owned(),
            max_connections: 4,
            busy_timeout_secs: 1,
        };
        let pool = db::connect(&cfg).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        WorkflowStore::new(pool)
    }

    pub(crate) fn draft(title: &str) -> NewProposal {
        NewProposal {
            project_id: None,
            title: title.to_string(),
            content: Some("proposal body".into()),
            submitter_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_in_draft() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        let proposal = store.create(&draft("Acme renewal")).await.unwrap();
        assert_eq!(proposal.status, ProposalStatus::Draft);
        assert!(proposal.submitted_at.is_none());
        assert!(store.events(proposal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::ProposalNotFound { .. }));
    }

    #[tokio::test]
    async fn test_submit_sets_timestamp_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let actor = Uuid::new_v4();

        let proposal = store.create(&draft("Acme renewal")).await.unwrap();
        let (proposal, event) = store
            .transition(
                proposal.id,
                ProposalStatus::Draft,
                ReviewAction::Submit,
                actor,
                Some("ready for review".into()),
            )
            .await
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::PendingApproval);
        assert!(proposal.submitted_at.is_some());
        assert_eq!(proposal.submitter_message.as_deref(), Some("ready for review"));
        assert_eq!(event.from_status, ProposalStatus::Draft);
        assert_eq!(event.to_status, ProposalStatus::PendingApproval);
    }

    #[tokio::test]
    async fn test_stale_expected_status_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let actor = Uuid::new_v4();

        let proposal = store.create(&draft("Acme renewal")).await.unwrap();
        store
            .transition(proposal.id, ProposalStatus::Draft, ReviewAction::Submit, actor, None)
            .await
            .unwrap();

        // Same check-and-set replayed against a row that already moved
        let err = store
            .transition(proposal.id, ProposalStatus::Draft, ReviewAction::Submit, actor, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification { .. }));

        // The loser left no audit event behind
        assert_eq!(store.events(proposal.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_review_without_feedback_keeps_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let actor = Uuid::new_v4();

        let proposal = store.create(&draft("Acme renewal")).await.unwrap();
        store
            .transition(proposal.id, ProposalStatus::Draft, ReviewAction::Submit, actor, None)
            .await
            .unwrap();
        store
            .transition(
                proposal.id,
                ProposalStatus::PendingApproval,
                ReviewAction::Hold,
                actor,
                Some("needs budget detail".into()),
            )
            .await
            .unwrap();
        let (proposal, _) = store
            .transition(proposal.id, ProposalStatus::OnHold, ReviewAction::Approve, actor, None)
            .await
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert_eq!(proposal.admin_feedback.as_deref(), Some("needs budget detail"));
        assert_eq!(proposal.reviewed_by, Some(actor));
    }

    #[tokio::test]
    async fn test_list_orders_submitted_first_newest_down() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let actor = Uuid::new_v4();

        let never_submitted = store.create(&draft("still a draft")).await.unwrap();
        let first = store.create(&draft("first submitted")).await.unwrap();
        let second = store.create(&draft("second submitted")).await.unwrap();

        store
            .transition(first.id, ProposalStatus::Draft, ReviewAction::Submit, actor, None)
            .await
            .unwrap();
        store
            .transition(second.id, ProposalStatus::Draft, ReviewAction::Submit, actor, None)
            .await
            .unwrap();

        let listed = store.list(None).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id, never_submitted.id]);

        let pending = store
            .list(Some(ProposalStatus::PendingApproval))
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
    }
}
