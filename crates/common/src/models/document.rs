//! Uploaded document model
//!
//! A document row is created on upload and doubles as the ingestion job
//! record: callers poll it until `status` reaches a terminal value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, Result};

/// Entity a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    CaseStudy,
    Project,
}

impl OwnerKind {
    /// All kinds, for exhaustive checks
    pub const ALL: [OwnerKind; 2] = [OwnerKind::CaseStudy, OwnerKind::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::CaseStudy => "case_study",
            OwnerKind::Project => "project",
        }
    }

    /// Vector-index collection documents of this kind land in
    pub fn collection(&self) -> &'static str {
        match self {
            OwnerKind::CaseStudy => "case_studies",
            OwnerKind::Project => "projects",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "case_study" => Ok(OwnerKind::CaseStudy),
            "project" => Ok(OwnerKind::Project),
            _ => Err(AppError::InvalidStoredValue {
                column: "owner_kind".into(),
                value: value.into(),
            }),
        }
    }
}

/// Ingestion lifecycle of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Pending,
    Processed,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Processed => "processed",
            IngestStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(IngestStatus::Pending),
            "processed" => Ok(IngestStatus::Processed),
            "failed" => Ok(IngestStatus::Failed),
            _ => Err(AppError::InvalidStoredValue {
                column: "status".into(),
                value: value.into(),
            }),
        }
    }

    /// Whether polling can stop
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestStatus::Processed | IngestStatus::Failed)
    }
}

/// Accepted upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocFormat {
    Pdf,
    Docx,
}

impl DocFormat {
    /// Map a declared file extension onto the allow-list. Returns None for
    /// anything outside it (including legacy binary `.doc`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocFormat::Pdf),
            "docx" => Some(DocFormat::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocFormat::Pdf => "pdf",
            DocFormat::Docx => "docx",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pdf" => Ok(DocFormat::Pdf),
            "docx" => Ok(DocFormat::Docx),
            _ => Err(AppError::InvalidStoredValue {
                column: "format".into(),
                value: value.into(),
            }),
        }
    }
}

/// An uploaded source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_kind: OwnerKind,
    pub owner_id: Uuid,
    /// Vector-index partition the document's chunks belong to
    pub collection: String,
    pub title: String,
    pub filename: String,
    pub format: DocFormat,
    pub size_bytes: i64,
    pub status: IngestStatus,
    pub failure_reason: Option<String>,
    pub chunk_count: i64,
    /// sha256 of the raw upload, used for change detection
    pub content_hash: String,
    pub industry: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_allow_list() {
        assert_eq!(DocFormat::from_extension("pdf"), Some(DocFormat::Pdf));
        assert_eq!(DocFormat::from_extension("PDF"), Some(DocFormat::Pdf));
        assert_eq!(DocFormat::from_extension("docx"), Some(DocFormat::Docx));
        assert_eq!(DocFormat::from_extension("doc"), None);
        assert_eq!(DocFormat::from_extension("exe"), None);
        assert_eq!(DocFormat::from_extension(""), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [IngestStatus::Pending, IngestStatus::Processed, IngestStatus::Failed] {
            assert_eq!(IngestStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(IngestStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!IngestStatus::Pending.is_terminal());
        assert!(IngestStatus::Processed.is_terminal());
        assert!(IngestStatus::Failed.is_terminal());
    }

    #[test]
    fn test_owner_collections() {
        assert_eq!(OwnerKind::CaseStudy.collection(), "case_studies");
        assert_eq!(OwnerKind::Project.collection(), "projects");
    }
}
