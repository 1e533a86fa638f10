//! Conversation persistence
//!
//! Turns are append-only per conversation id. Assistant turns carry the
//! citations that grounded them, serialized as a JSON array beside the
//! text so a conversation can be replayed with its sources intact.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use presail_common::db::DbPool;
use presail_common::errors::{AppError, Result};
use presail_common::models::{ChatTurn, Citation, TurnRole};

#[derive(Clone)]
pub struct ConversationStore {
    pool: DbPool,
}

impl ConversationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one turn to its conversation
    pub async fn append(&self, turn: &ChatTurn) -> Result<()> {
        let citations = serde_json::to_string(&turn.citations)?;
        sqlx::query(
            r#"
            INSERT INTO conversation_turns (id, conversation_id, role, content, citations, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(turn.id.to_string())
        .bind(turn.conversation_id.to_string())
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(citations)
        .bind(turn.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent `limit` turns of a conversation, oldest first
    pub async fn recent(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<ChatTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, citations, created_at
            FROM conversation_turns
            WHERE conversation_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows
            .into_iter()
            .map(turn_from_row)
            .collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }
}

fn turn_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChatTurn> {
    let id: String = row.try_get("id")?;
    let conversation_id: String = row.try_get("conversation_id")?;
    let role: String = row.try_get("role")?;
    let citations: String = row.try_get("citations")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    let citations: Vec<Citation> = serde_json::from_str(&citations)?;

    Ok(ChatTurn {
        id: parse_uuid(&id, "id")?,
        conversation_id: parse_uuid(&conversation_id, "conversation_id")?,
        role: TurnRole::parse(&role)?,
        content: row.try_get("content")?,
        citations,
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
mod tests {
    use super::*;
    use presail_common::config::DatabaseConfig;
    use presail_common::db;

    async fn temp_store(dir: &tempfile::TempDir) -> ConversationStore {
        let cfg = DatabaseConfig {
            path: dir.path().join("h.db").to_string_lossy().into_owned(),
            max_connections: 2,
            busy_timeout_secs: 1,
        };
        let pool = db::connect(&cfg).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        ConversationStore::new(pool)
    }

    fn turn(conversation_id: Uuid, role: TurnRole, content: &str) -> ChatTurn {
        ChatTurn {
            id: Uuid::now_v7(),
            conversation_id,
            role,
            content: content.to_string(),
            citations: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_recent_returns_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let conversation = Uuid::new_v4();

        for content in ["first", "second", "third"] {
            store
                .append(&turn(conversation, TurnRole::User, content))
                .await
                .unwrap();
        }

        let turns = store.recent(conversation, 10).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_recent_keeps_newest_when_limited() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let conversation = Uuid::new_v4();

        for content in ["first", "second", "third", "fourth"] {
            store
                .append(&turn(conversation, TurnRole::User, content))
                .await
                .unwrap();
        }

        let turns = store.recent(conversation, 2).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["third", "fourth"]);
    }

    #[tokio::test]
    async fn test_citations_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        let conversation = Uuid::new_v4();

        let mut reply = turn(conversation, TurnRole::Assistant, "grounded [1]");
        reply.citations = vec![Citation {
            index: 1,
            document_id: Uuid::new_v4(),
            title: "Acme churn study".into(),
            locator: "p. 3".into(),
            quote: "reduced churn by 32 percent".into(),
            score: 0.91,
        }];
        store.append(&reply).await.unwrap();

        let turns = store.recent(conversation, 1).await.unwrap();
        assert_eq!(turns[0].citations, reply.citations);
        assert_eq!(turns[0].role, TurnRole::Assistant);
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.append(&turn(a, TurnRole::User, "hello a")).await.unwrap();
        store.append(&turn(b, TurnRole::User, "hello b")).await.unwrap();

        let turns = store.recent(a, 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "hello a");
    }
}
