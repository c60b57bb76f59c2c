use std::sync::Arc;

use axum::{extract::State, routing::put, Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;
use crate::services::collaborators::TokenProvider;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/token", put(set_token))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: Option<String>,
}

/// Replace the bearer token used for remote calls. A null or empty token signs
/// the engine out; subsequent remote calls fail and fall back to the cache.
async fn set_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.token.set(req.token).await;
    let authenticated = state.token.bearer_token().await.is_some();
    tracing::info!("Session token updated (authenticated: {})", authenticated);

    Ok(Json(json!({ "authenticated": authenticated })))
}

#[cfg(test)]
mod tests {
    use crate::routes::{router, test_support::offline_state};
    use crate::services::collaborators::TokenProvider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn token_can_be_set_and_cleared() {
        let state = offline_state();
        let app = router(state.clone());

        let request = Request::put("/api/session/token")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"token":"abc"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.token.bearer_token().await.as_deref(), Some("abc"));

        let request = Request::put("/api/session/token")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"token":null}"#))
            .unwrap();
        app.oneshot(request).await.unwrap();
        assert_eq!(state.token.bearer_token().await, None);
    }
}
