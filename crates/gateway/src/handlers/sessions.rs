//! Session management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use propforge_common::{
    context::MemorySnapshot,
    errors::{AppError, Result},
};

/// Assistant reply to remember
#[derive(Debug, Deserialize, Validate)]
pub struct RecordResponseRequest {
    #[validate(length(min = 1, max = 20000))]
    pub message: String,
}

/// Append the assistant's reply to the session
pub async fn record_response(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RecordResponseRequest>,
) -> Result<StatusCode> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("message".into()),
    })?;

    state.engine.record_response(&session_id, &request.message).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current memory of a session
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<MemorySnapshot>> {
    state
        .engine
        .session_snapshot(&session_id)
        .await
        .map(Json)
        .ok_or(AppError::SessionNotFound { id: session_id })
}

/// Forget a session
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode> {
    if state.engine.close_session(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::SessionNotFound { id: session_id })
    }
}
