//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub store: StoreCheck,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct StoreCheck {
    pub provider: String,
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: propforge_common::VERSION,
    })
}

/// Ready once the configured store answers; in-memory fixtures always do
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let mut store = StoreCheck {
        provider: state.config.store.provider.clone(),
        up: true,
        latency_ms: None,
        error: None,
    };

    if let Some(ref db) = state.db {
        let started = Instant::now();
        match db.ping().await {
            Ok(()) => store.latency_ms = Some(started.elapsed().as_millis() as u64),
            Err(e) => {
                store.up = false;
                store.error = Some(e.to_string());
            }
        }
    }

    let (status, label) = if store.up {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(ReadyResponse {
            status: label,
            store,
            active_sessions: state.engine.sessions().session_count(),
        }),
    )
}
