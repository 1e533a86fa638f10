//! Grounded chat handler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use presail_common::{
    errors::{AppError, Result},
    models::{Citation, OwnerKind},
};

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    /// Omitted on the first message; later messages reuse the returned id
    pub conversation_id: Option<Uuid>,

    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    /// Vector collection to ground against, defaults to case studies
    pub collection: Option<String>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub conversation_id: Uuid,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub grounded: bool,
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    request.validate()?;

    let collection = match request.collection.as_deref() {
        None => OwnerKind::CaseStudy.collection().to_string(),
        Some(name) => {
            let known = OwnerKind::ALL.iter().any(|kind| kind.collection() == name);
            if !known {
                return Err(AppError::Validation {
                    message: format!("unknown collection: {name}"),
                    field: Some("collection".into()),
                });
            }
            name.to_string()
        }
    };

    let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
    let reply = state
        .orchestrator
        .answer(conversation_id, &request.message, &collection)
        .await?;

    Ok(Json(ChatResponse {
        conversation_id: reply.conversation_id,
        answer: reply.answer,
        citations: reply.citations,
        grounded: reply.grounded,
    }))
}
