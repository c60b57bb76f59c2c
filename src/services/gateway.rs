use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RemoteConfig;
use crate::db::models::{Event, EventKind, EventType, Participant};
use crate::error::{AppError, AppResult};
use crate::services::collaborators::TokenProvider;
use crate::services::temporal;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Event as the remote API returns it. Dates stay raw until the engine
/// normalizes them; numeric fields tolerate strings and nulls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteEvent {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub goal_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub team_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub members_per_team: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub total_participants: Option<u32>,
}

impl RemoteEvent {
    /// Team or individual layout. Anything other than "team" is individual.
    pub fn kind(&self) -> EventKind {
        match self.event_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("team") => EventKind::Team {
                team_count: self.team_count.unwrap_or(0),
                members_per_team: self.members_per_team.unwrap_or(0),
            },
            _ => EventKind::Individual {
                total_participants: self.total_participants.unwrap_or(0),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteParticipant {
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_opt_id")]
    pub team_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub individual_progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub team_progress: Option<f64>,
}

impl From<RemoteParticipant> for Participant {
    fn from(p: RemoteParticipant) -> Self {
        Participant {
            user_id: p.user_id,
            name: p.name,
            team_id: p.team_id,
            individual_progress: p.individual_progress.unwrap_or(0.0),
            team_progress: p.team_progress.unwrap_or(0.0),
        }
    }
}

/// Body of `POST /events` and `PUT /events/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub title: String,
    pub description: String,
    pub location: String,
    pub activity_type: String,
    pub goal_value: f64,
    pub current_value: f64,
    pub start_date: String,
    pub end_date: String,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members_per_team: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_participants: Option<u32>,
}

impl From<&Event> for EventPayload {
    fn from(event: &Event) -> Self {
        let (team_count, members_per_team, total_participants) = match event.kind {
            EventKind::Team {
                team_count,
                members_per_team,
            } => (Some(team_count), Some(members_per_team), None),
            EventKind::Individual { total_participants } => {
                (None, None, Some(total_participants))
            }
        };

        EventPayload {
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            activity_type: event.activity_kind.clone(),
            goal_value: event.goal_value,
            current_value: event.current_value,
            start_date: temporal::to_wire(&event.start),
            end_date: temporal::to_wire(&event.end),
            event_type: event.kind.event_type(),
            team_count,
            members_per_team,
            total_participants,
        }
    }
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid identifier: {}", other))),
    }
}

fn lenient_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_f64(d)?
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32))
}

// ============================================================================
// Gateway
// ============================================================================

/// Authenticated access to the remote events API.
#[async_trait]
pub trait RemoteGateway: Send + Sync + 'static {
    async fn list_events(&self) -> AppResult<Vec<RemoteEvent>>;
    async fn get_event(&self, id: &str) -> AppResult<RemoteEvent>;
    async fn list_participants(&self, event_id: &str) -> AppResult<Vec<RemoteParticipant>>;
    async fn create_event(&self, payload: &EventPayload) -> AppResult<RemoteEvent>;
    async fn update_event(&self, id: &str, payload: &EventPayload) -> AppResult<()>;
    async fn delete_event(&self, id: &str) -> AppResult<()>;
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    token: Arc<dyn TokenProvider>,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl HttpGateway {
    pub fn new(config: &RemoteConfig, token: Arc<dyn TokenProvider>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            max_attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(500),
        })
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn event_path(id: &str) -> String {
        format!("events/{}", urlencoding::encode(id))
    }

    async fn bearer(&self) -> AppResult<String> {
        self.token
            .bearer_token()
            .await
            .ok_or_else(|| AppError::Remote("No auth token available".to_string()))
    }

    /// Send a request, retrying network errors, 429 and 5xx with exponential
    /// backoff. Other statuses are returned for the caller to interpret.
    async fn send_with_backoff<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_backoff = Duration::from_secs(30);
        let mut backoff = self.initial_backoff;

        for attempt in 0..self.max_attempts {
            let last_attempt = attempt + 1 >= self.max_attempts;

            match (make_request)().send().await {
                Ok(resp) => {
                    if resp.status() == StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                    {
                        if last_attempt {
                            let status = resp.status();
                            let err_text = resp.text().await.unwrap_or_default();
                            return Err(AppError::Remote(format!(
                                "Failed after {} attempts ({}): {}",
                                attempt + 1,
                                status,
                                err_text
                            )));
                        }

                        let mut wait = backoff;
                        if let Some(secs) = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                        {
                            wait = Duration::from_secs(secs).min(max_backoff);
                        }

                        tracing::warn!(
                            "Transient events API error (status: {}). Retrying in {:?} (attempt {}/{})",
                            resp.status(),
                            wait,
                            attempt + 1,
                            self.max_attempts
                        );

                        tokio::time::sleep(wait).await;
                        backoff = (backoff * 2).min(max_backoff);
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if last_attempt {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        "Events API request failed: {}. Retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }

        Err(AppError::Remote("Request was never attempted".to_string()))
    }

    /// Map 404 and other non-success statuses to errors; any 2xx passes through.
    async fn check_status(
        response: reqwest::Response,
        what: &str,
    ) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "{} failed ({}): {}",
                what, status, error_text
            )));
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> AppResult<T> {
        Self::check_status(response, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AppError::Remote(format!("Failed to parse {} response: {}", what, e)))
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list_events(&self) -> AppResult<Vec<RemoteEvent>> {
        let token = self.bearer().await?;
        let response = self
            .send_with_backoff(|| self.client.get(self.url("events")).bearer_auth(&token))
            .await?;

        let envelope: DataEnvelope<Vec<RemoteEvent>> =
            Self::read_json(response, "list events").await?;
        Ok(envelope.data)
    }

    async fn get_event(&self, id: &str) -> AppResult<RemoteEvent> {
        let token = self.bearer().await?;
        let url = self.url(&Self::event_path(id));
        let response = self
            .send_with_backoff(|| self.client.get(&url).bearer_auth(&token))
            .await?;

        let envelope: DataEnvelope<RemoteEvent> =
            Self::read_json(response, &format!("event {}", id)).await?;
        Ok(envelope.data)
    }

    async fn list_participants(&self, event_id: &str) -> AppResult<Vec<RemoteParticipant>> {
        let token = self.bearer().await?;
        let url = self.url(&format!("{}/participants", Self::event_path(event_id)));
        let response = self
            .send_with_backoff(|| self.client.get(&url).bearer_auth(&token))
            .await?;

        let envelope: DataEnvelope<Vec<RemoteParticipant>> =
            Self::read_json(response, &format!("participants of event {}", event_id)).await?;
        Ok(envelope.data)
    }

    async fn create_event(&self, payload: &EventPayload) -> AppResult<RemoteEvent> {
        let token = self.bearer().await?;
        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(self.url("events"))
                    .bearer_auth(&token)
                    .json(payload)
            })
            .await?;

        let envelope: DataEnvelope<RemoteEvent> =
            Self::read_json(response, "create event").await?;
        Ok(envelope.data)
    }

    async fn update_event(&self, id: &str, payload: &EventPayload) -> AppResult<()> {
        let token = self.bearer().await?;
        let url = self.url(&Self::event_path(id));
        let response = self
            .send_with_backoff(|| self.client.put(&url).bearer_auth(&token).json(payload))
            .await?;

        // The body, if any, is not needed; servers may answer 204.
        Self::check_status(response, &format!("update event {}", id)).await?;
        Ok(())
    }

    async fn delete_event(&self, id: &str) -> AppResult<()> {
        let token = self.bearer().await?;
        let url = self.url(&Self::event_path(id));
        let response = self
            .send_with_backoff(|| self.client.delete(&url).bearer_auth(&token))
            .await?;

        let confirmation: DeleteResponse =
            match Self::read_json(response, &format!("delete event {}", id)).await {
                Ok(c) => c,
                Err(AppError::NotFound(_)) => {
                    tracing::info!("Event {} was already deleted upstream", id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

        if !confirmation.success {
            return Err(AppError::Remote(confirmation.message.unwrap_or_else(|| {
                format!("Remote refused to delete event {}", id)
            })));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::collaborators::StaticToken;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeApi {
        flaky_calls: AtomicUsize,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .map(|h| h == "Bearer secret")
            .unwrap_or(false)
    }

    async fn list_events(
        State(api): State<Arc<FakeApi>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
        }
        // First call fails with a 503 to exercise the retry path.
        if api.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({})),
            );
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "data": [{
                    "id": 17,
                    "title": "Step Up",
                    "activity_type": "steps",
                    "goal_value": "10000",
                    "current_value": null,
                    "start_date": "2025-05-11",
                    "end_date": "2025-05-12 18:00:00",
                    "event_type": "team",
                    "team_count": 2,
                    "members_per_team": "4"
                }]
            })),
        )
    }

    async fn participants(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
        if id != "17" {
            return (StatusCode::NOT_FOUND, Json(serde_json::json!({})));
        }
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "data": [
                    {"user_id": 1, "name": "Ana", "team_id": 3, "individual_progress": 1200},
                    {"user_id": "u2", "name": "Bo", "team_id": null, "individual_progress": "80.5"}
                ]
            })),
        )
    }

    async fn delete_event(Path(id): Path<String>) -> Json<DeleteResponse> {
        Json(DeleteResponse {
            success: id == "17",
            message: Some("cannot delete".to_string()),
        })
    }

    async fn update_event(Path(id): Path<String>) -> StatusCode {
        if id == "17" {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::NOT_FOUND
        }
    }

    async fn create_event(Json(payload): Json<EventPayload>) -> Json<Value> {
        Json(serde_json::json!({
            "data": { "id": "srv-1", "title": payload.title, "start_date": payload.start_date }
        }))
    }

    async fn spawn_fake_api() -> String {
        let app = Router::new()
            .route("/api/events", get(list_events).post(create_event))
            .route(
                "/api/events/:id",
                axum::routing::put(update_event).delete(delete_event),
            )
            .route("/api/events/:id/participants", get(participants))
            .with_state(Arc::new(FakeApi::default()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/", addr)
    }

    fn gateway(base_url: String, token: Option<&str>) -> HttpGateway {
        let config = RemoteConfig {
            base_url,
            api_token: None,
            timeout_seconds: 5,
            max_retries: 3,
        };
        HttpGateway::new(
            &config,
            Arc::new(StaticToken::new(token.map(str::to_string))),
        )
        .unwrap()
        .with_initial_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn list_events_retries_and_parses_lenient_fields() {
        let gw = gateway(spawn_fake_api().await, Some("secret"));

        let events = gw.list_events().await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.id, "17");
        assert_eq!(event.goal_value, Some(10000.0));
        assert_eq!(event.current_value, None);
        assert_eq!(
            event.kind(),
            EventKind::Team {
                team_count: 2,
                members_per_team: 4
            }
        );
    }

    #[tokio::test]
    async fn participants_accept_numeric_ids() {
        let gw = gateway(spawn_fake_api().await, Some("secret"));

        let participants: Vec<Participant> = gw
            .list_participants("17")
            .await
            .unwrap()
            .into_iter()
            .map(Participant::from)
            .collect();
        assert_eq!(participants[0].user_id, "1");
        assert_eq!(participants[0].team_id.as_deref(), Some("3"));
        assert_eq!(participants[1].team_id, None);
        assert_eq!(participants[1].individual_progress, 80.5);

        let missing = gw.list_participants("99").await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_requires_success_confirmation() {
        let gw = gateway(spawn_fake_api().await, Some("secret"));

        assert!(gw.delete_event("17").await.is_ok());
        match gw.delete_event("18").await {
            Err(AppError::Remote(msg)) => assert_eq!(msg, "cannot delete"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    fn run_payload() -> EventPayload {
        EventPayload {
            title: "Run".to_string(),
            description: String::new(),
            location: String::new(),
            activity_type: "km".to_string(),
            goal_value: 5.0,
            current_value: 0.0,
            start_date: "2025-06-01T00:00:00Z".to_string(),
            end_date: "2025-06-02T00:00:00Z".to_string(),
            event_type: EventType::Individual,
            team_count: None,
            members_per_team: None,
            total_participants: Some(10),
        }
    }

    #[tokio::test]
    async fn create_returns_server_id() {
        let gw = gateway(spawn_fake_api().await, Some("secret"));

        let created = gw.create_event(&run_payload()).await.unwrap();
        assert_eq!(created.id, "srv-1");
        assert_eq!(created.title, "Run");
    }

    #[tokio::test]
    async fn update_accepts_empty_success_body() {
        let gw = gateway(spawn_fake_api().await, Some("secret"));

        assert!(gw.update_event("17", &run_payload()).await.is_ok());
        assert!(matches!(
            gw.update_event("18", &run_payload()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_token_fails_before_io() {
        let gw = gateway("http://127.0.0.1:9/".to_string(), None);
        let result = gw.list_events().await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));
    }
}
