//! Database pool and schema management
//!
//! SQLite via sqlx: WAL journaling so analytics reads never block (or see
//! half of) a workflow transaction, foreign keys on, and idempotent
//! `CREATE TABLE IF NOT EXISTS` migrations executed at startup.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::DatabaseConfig;
use crate::errors::Result;

/// Shared connection pool type
pub type DbPool = SqlitePool;

/// Open (creating if missing) the database described by `cfg`
pub async fn connect(cfg: &DatabaseConfig) -> Result<DbPool> {
    if cfg.path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&cfg.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(cfg.busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Cheap liveness check used by the readiness probe
pub async fn ping(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Create all tables and indexes. Safe to run on every startup.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    // Uploaded documents; the row doubles as the ingestion job record.
    // `collection` is the vector-index partition the document's chunks
    // belong to, derived from the owner kind at ingest time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL CHECK (owner_kind IN ('case_study', 'project')),
            owner_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            title TEXT NOT NULL,
            filename TEXT NOT NULL,
            format TEXT NOT NULL CHECK (format IN ('pdf', 'docx')),
            size_bytes INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processed', 'failed')),
            failure_reason TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL,
            industry TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (owner_kind, owner_id, filename)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks with their embedding vectors (little-endian f32 blobs).
    // The embedding is nullable until the oracle call lands; the
    // (document_id, ordinal) key is the upsert target so re-ingestion
    // replaces rather than duplicates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL CHECK (ordinal >= 0),
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            start_pos INTEGER NOT NULL,
            end_pos INTEGER NOT NULL,
            page_start INTEGER,
            page_end INTEGER,
            content_hash TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            embedding_dim INTEGER,
            indexed_at TEXT,
            UNIQUE (document_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Proposals; status values form a closed set enforced both here and
    // in the workflow state machine.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            title TEXT NOT NULL,
            content TEXT,
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'pending_approval', 'approved', 'rejected', 'on_hold')),
            submitter_id TEXT NOT NULL,
            submitter_message TEXT,
            admin_feedback TEXT,
            submitted_at TEXT,
            reviewed_at TEXT,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only audit log; one row per successful transition, written
    // in the same transaction as the status change.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_events (
            id TEXT PRIMARY KEY,
            proposal_id TEXT NOT NULL REFERENCES proposals(id),
            actor_id TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('submit', 'approve', 'reject', 'hold')),
            from_status TEXT NOT NULL,
            to_status TEXT NOT NULL,
            feedback TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Conversation history consumed by the generation orchestrator
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_turns (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            citations TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, ordinal)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_kind, owner_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_events_proposal ON review_events(proposal_id, created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_conversation ON conversation_turns(conversation_id, created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
