//! Analytics handler

use axum::{extract::State, Json};

use crate::AppState;
use presail_common::errors::Result;
use presail_workflow::AnalyticsSnapshot;

/// Current rollups, served from the time-boxed cache when fresh
pub async fn summary(State(state): State<AppState>) -> Result<Json<AnalyticsSnapshot>> {
    Ok(Json(state.analytics.summary().await?))
}
