//! Document ingestion handlers
//!
//! Upload accepts a multipart form (the file plus owner fields), stores
//! the raw bytes, returns 202 and indexes in the background; the
//! document id doubles as the job id and the detail endpoint is the
//! poll URL.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use presail_common::{
    errors::{AppError, Result},
    models::{Document, OwnerKind},
};
use presail_ingestion::NewUpload;

/// Response after accepting an upload
#[derive(Serialize)]
pub struct UploadResponse {
    pub document_id: Uuid,
    /// Same as `document_id`; ingestion is polled, not pushed
    pub job_id: Uuid,
    pub status: String,
    pub poll_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub owner_kind: Option<String>,
    pub owner_id: Option<Uuid>,
}

/// Accept a document upload and start async ingestion
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let upload = parse_upload(multipart).await?;
    let document = state.pipeline.ingest(upload).await?;

    // Indexing runs in the background; failures land on the document row
    let pipeline = state.pipeline.clone();
    let document_id = document.id;
    tokio::spawn(async move {
        if let Err(err) = pipeline.process(document_id).await {
            tracing::error!(%document_id, error = %err, "Background ingestion failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id: document.id,
            job_id: document.id,
            status: document.status.as_str().to_string(),
            poll_url: format!("/v1/documents/{}", document.id),
        }),
    ))
}

/// List documents, optionally narrowed to one owning entity
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>> {
    let owner_kind = params
        .owner_kind
        .as_deref()
        .map(parse_owner_kind)
        .transpose()?;
    let documents = state.docs.list(owner_kind, params.owner_id).await?;
    Ok(Json(documents))
}

/// Ingestion status and detail; this is the upload's poll URL
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>> {
    let document = state
        .docs
        .get(id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;
    Ok(Json(document))
}

/// Delete a document together with its indexed chunks and raw bytes
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.pipeline.delete(id).await?;
    tracing::info!(document_id = %id, "Document deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Rebuild a document's chunks from the stored source bytes. The
/// recovery path for a corrupted collection.
pub async fn reindex(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<UploadResponse>)> {
    let document = state
        .docs
        .get(id)
        .await?
        .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() })?;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(err) = pipeline.reindex(id).await {
            tracing::error!(document_id = %id, error = %err, "Reindex failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id: document.id,
            job_id: document.id,
            status: "pending".to_string(),
            poll_url: format!("/v1/documents/{}", document.id),
        }),
    ))
}

/// Pull the upload out of the multipart form. Expected fields: `file`
/// (with a filename), `owner_kind`, `owner_id`, and optional `title`,
/// `industry`, `tags` (comma-separated).
async fn parse_upload(mut multipart: Multipart) -> Result<NewUpload> {
    let mut filename = None;
    let mut bytes = None;
    let mut owner_kind = None;
    let mut owner_id = None;
    let mut title = None;
    let mut industry = None;
    let mut tags = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                filename = field.file_name().map(str::to_string);
                bytes = Some(field.bytes().await.map_err(bad_multipart)?.to_vec());
            }
            "owner_kind" => {
                let value = field.text().await.map_err(bad_multipart)?;
                owner_kind = Some(parse_owner_kind(&value)?);
            }
            "owner_id" => {
                let value = field.text().await.map_err(bad_multipart)?;
                owner_id = Some(Uuid::parse_str(&value).map_err(|_| AppError::Validation {
                    message: format!("owner_id is not a UUID: {value}"),
                    field: Some("owner_id".into()),
                })?);
            }
            "title" => title = Some(field.text().await.map_err(bad_multipart)?),
            "industry" => industry = Some(field.text().await.map_err(bad_multipart)?),
            "tags" => {
                let value = field.text().await.map_err(bad_multipart)?;
                tags = value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let filename = filename.filter(|f| !f.is_empty()).ok_or(AppError::Validation {
        message: "file part with a filename is required".into(),
        field: Some("file".into()),
    })?;
    let bytes = bytes.ok_or(AppError::Validation {
        message: "file part is required".into(),
        field: Some("file".into()),
    })?;
    let owner_kind = owner_kind.ok_or(AppError::Validation {
        message: "owner_kind is required".into(),
        field: Some("owner_kind".into()),
    })?;
    let owner_id = owner_id.ok_or(AppError::Validation {
        message: "owner_id is required".into(),
        field: Some("owner_id".into()),
    })?;

    let declared_extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    Ok(NewUpload {
        owner_kind,
        owner_id,
        title,
        filename,
        declared_extension,
        bytes,
        industry,
        tags,
    })
}

fn parse_owner_kind(value: &str) -> Result<OwnerKind> {
    OwnerKind::parse(value).map_err(|_| AppError::Validation {
        message: format!("unknown owner_kind: {value}"),
        field: Some("owner_kind".into()),
    })
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::Validation {
        message: format!("malformed multipart body: {err}"),
        field: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_kind_validation() {
        assert!(parse_owner_kind("case_study").is_ok());
        assert!(parse_owner_kind("project").is_ok());
        let err = parse_owner_kind("tenant").unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
