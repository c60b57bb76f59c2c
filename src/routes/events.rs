use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::{Event, EventDraft, EventId, LifecycleState};
use crate::error::{AppError, AppResult};
use crate::services::teams::{participant_count, team_standings, TeamStanding};
use crate::services::{temporal, ClearReport, ReconcileReport};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_events).post(create_event))
        .route("/load", post(load_events))
        .route("/sync", post(sync_events))
        .route("/clear-past", post(clear_past_events))
        .route(
            "/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/:id/refresh", post(refresh_event))
        .route("/:id/progress", post(record_progress))
        .route("/:id/standings", get(get_standings))
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Event as presented to clients, with the derived flags spelled out.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Path segment for this event, e.g. "42" or "local-3".
    pub key: String,
    pub is_local_only: bool,
    pub participant_count: usize,
    #[serde(flatten)]
    pub event: Event,
}

impl From<Event> for EventView {
    fn from(event: Event) -> Self {
        EventView {
            key: event.id.to_string(),
            is_local_only: event.is_local_only(),
            participant_count: participant_count(&event),
            event,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
}

/// Partial edit; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub activity_kind: Option<String>,
    pub goal_value: Option<f64>,
    pub current_value: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub amount: f64,
}

#[derive(Debug, Serialize)]
pub struct StandingsResponse {
    pub key: String,
    pub participant_count: usize,
    pub teams: Vec<TeamStanding>,
}

fn parse_id(raw: &str) -> EventId {
    match raw.parse() {
        Ok(id) => id,
        Err(never) => match never {},
    }
}

fn views(events: Vec<Event>) -> Vec<EventView> {
    events.into_iter().map(EventView::from).collect()
}

// ============================================================================
// Handlers
// ============================================================================

/// List the in-memory collection, optionally filtered by lifecycle state.
async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<EventView>>> {
    let events = match query.state.as_deref() {
        None | Some("") | Some("all") => state.engine.events(),
        Some(raw) => {
            let lifecycle: LifecycleState = raw.parse().map_err(AppError::BadRequest)?;
            state.engine.events_in_state(lifecycle)
        }
    };
    Ok(Json(views(events)))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<EventDraft>,
) -> AppResult<(StatusCode, Json<EventView>)> {
    let event = state.engine.add_event(draft).await?;
    Ok((StatusCode::CREATED, Json(event.into())))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<EventView>> {
    let id = parse_id(&id);
    let event = state
        .engine
        .get_event(&id)
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
    Ok(Json(event.into()))
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateEventRequest>,
) -> AppResult<Json<EventView>> {
    let id = parse_id(&id);
    let updated = state
        .engine
        .edit_event(&id, move |event| apply_update(event, req))
        .await?;
    Ok(Json(updated.into()))
}

/// Apply the fields present in `req`, rejecting the edit if the result is invalid.
fn apply_update(event: &mut Event, req: UpdateEventRequest) -> AppResult<()> {
    if let Some(title) = req.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("title must not be blank".to_string()));
        }
        event.title = title;
    }
    if let Some(description) = req.description {
        event.description = description;
    }
    if let Some(location) = req.location {
        event.location = location;
    }
    if let Some(activity_kind) = req.activity_kind {
        event.activity_kind = activity_kind;
    }
    if let Some(goal_value) = req.goal_value {
        event.goal_value = goal_value;
    }
    if let Some(current_value) = req.current_value {
        event.current_value = current_value;
    }
    if let Some(start) = req.start.as_deref() {
        event.start = temporal::parse_instant(Some(start))
            .map_err(|e| AppError::Validation(format!("start date is invalid: {}", e)))?;
    }
    if let Some(end) = req.end.as_deref() {
        event.end = temporal::parse_instant(Some(end))
            .map_err(|e| AppError::Validation(format!("end date is invalid: {}", e)))?;
    }
    if event.end < event.start {
        return Err(AppError::Validation(
            "end date must not be before start date".to_string(),
        ));
    }
    Ok(())
}

async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let id = parse_id(&id);
    state.engine.delete_event(&id).await?;
    Ok(Json(json!({
        "deleted": true,
        "key": id.to_string()
    })))
}

async fn refresh_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<EventView>> {
    let event = state.engine.refresh_event(&parse_id(&id)).await?;
    Ok(Json(event.into()))
}

async fn record_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProgressRequest>,
) -> AppResult<Json<EventView>> {
    if !req.amount.is_finite() {
        return Err(AppError::BadRequest("amount must be a finite number".to_string()));
    }
    let event = state.engine.record_progress(&parse_id(&id), req.amount).await?;
    Ok(Json(event.into()))
}

async fn get_standings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<StandingsResponse>> {
    let id = parse_id(&id);
    let event = state
        .engine
        .get_event(&id)
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;

    Ok(Json(StandingsResponse {
        key: id.to_string(),
        participant_count: participant_count(&event),
        teams: team_standings(&event),
    }))
}

/// Re-fetch everything from the remote (or the cache when offline).
async fn load_events(State(state): State<Arc<AppState>>) -> Json<Vec<EventView>> {
    Json(views(state.engine.load().await))
}

async fn sync_events(State(state): State<Arc<AppState>>) -> Json<ReconcileReport> {
    Json(state.engine.reconcile().await)
}

async fn clear_past_events(State(state): State<Arc<AppState>>) -> Json<ClearReport> {
    Json(state.engine.clear_past_events().await)
}
