//! Chat context handler

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::AppState;
use propforge_common::{
    context::{PromptObject, RoleMetadata},
    errors::{AppError, Result},
};

/// Chat context request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatContextRequest {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,

    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    /// Shown to the model alongside the role
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Include the plain-text rendering of the prompt
    #[serde(default)]
    pub render: bool,
}

/// Chat context response
#[derive(Serialize)]
pub struct ChatContextResponse {
    pub session_id: String,
    pub prompt: PromptObject,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,

    pub processing_time_ms: u64,
}

/// Role from the configured header, falling back to the default role
fn resolve_role(state: &AppState, headers: &HeaderMap, request: &ChatContextRequest) -> RoleMetadata {
    let role = headers
        .get(state.config.server.role_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| state.config.server.default_role.clone());

    RoleMetadata {
        role,
        display_name: request.display_name.clone(),
        attributes: request.attributes.clone(),
    }
}

/// Build the grounded prompt for one chat message
pub async fn chat_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatContextRequest>,
) -> Result<Json<ChatContextResponse>> {
    let start = Instant::now();

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let role = resolve_role(&state, &headers, &request);

    // Cancelled if the client goes away and axum drops this future
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let prompt = state
        .engine
        .handle_query(&request.session_id, &role, &request.message, &cancel)
        .await?;
    guard.disarm();

    let rendered = request.render.then(|| prompt.render_text());

    Ok(Json(ChatContextResponse {
        session_id: request.session_id,
        prompt,
        rendered,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
