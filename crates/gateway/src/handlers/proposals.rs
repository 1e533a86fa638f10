//! Proposal workflow handlers
//!
//! Every status change goes through the workflow engine; these handlers
//! only translate HTTP into engine calls and attach the acting user
//! from the `x-actor-id` header.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::identity::ActorId;
use crate::AppState;
use presail_common::{
    errors::{AppError, Result},
    models::{Proposal, ProposalStatus, ReviewAction, ReviewEvent},
};
use presail_workflow::NewProposal;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProposalRequest {
    pub project_id: Option<Uuid>,

    #[validate(length(min = 1, max = 500))]
    pub title: String,

    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitRequest {
    /// Message to the reviewer, stored on the proposal
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub action: ReviewAction,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

/// Proposal detail with its audit trail
#[derive(Serialize)]
pub struct ProposalDetail {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub events: Vec<ReviewEvent>,
}

pub async fn create(
    State(state): State<AppState>,
    ActorId(actor): ActorId,
    Json(request): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<Proposal>)> {
    request.validate()?;

    let proposal = state
        .engine
        .create_draft(NewProposal {
            project_id: request.project_id,
            title: request.title,
            content: request.content,
            submitter_id: actor,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

/// Admin listing with an optional status filter
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Proposal>>> {
    let status = params
        .status
        .as_deref()
        .map(|value| {
            ProposalStatus::parse(value).map_err(|_| AppError::Validation {
                message: format!("unknown status: {value}"),
                field: Some("status".into()),
            })
        })
        .transpose()?;
    Ok(Json(state.engine.list(status).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProposalDetail>> {
    let (proposal, events) = state.engine.get(id).await?;
    Ok(Json(ProposalDetail { proposal, events }))
}

pub async fn submit(
    State(state): State<AppState>,
    ActorId(actor): ActorId,
    Path(id): Path<Uuid>,
    body: Option<Json<SubmitRequest>>,
) -> Result<Json<Proposal>> {
    let message = body.and_then(|Json(request)| request.message);
    let proposal = state.engine.submit(id, actor, message).await?;
    Ok(Json(proposal))
}

pub async fn review(
    State(state): State<AppState>,
    ActorId(actor): ActorId,
    Path(id): Path<Uuid>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Proposal>> {
    let proposal = state
        .engine
        .review(id, actor, request.action, request.feedback)
        .await?;
    Ok(Json(proposal))
}
