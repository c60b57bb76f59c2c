use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub events: usize,
    pub unsynced_events: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let events = state.engine.events();
    let unsynced_events = events
        .iter()
        .filter(|e| e.is_local_only() || e.pending_update)
        .count();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        events: events.len(),
        unsynced_events,
    };

    (StatusCode::OK, Json(response))
}
