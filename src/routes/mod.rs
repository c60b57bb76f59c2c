use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod events;
pub mod health;
pub mod session;

/// All routes with state applied. Transport layers (CORS, tracing) are added
/// by the binary.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/events", events::router())
        .nest("/api/session", session::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryCache;
    use crate::services::collaborators::SharedToken;
    use crate::services::{EventSyncEngine, HttpGateway};

    /// State whose gateway has no token, so every remote call fails fast and
    /// the engine runs in offline mode.
    pub fn offline_state() -> Arc<AppState> {
        let config = Config::default();
        let token = SharedToken::default();
        let gateway = HttpGateway::new(&config.remote, Arc::new(token.clone()))
            .expect("client builds");
        let engine = EventSyncEngine::new(
            Arc::new(gateway),
            Arc::new(MemoryCache::new()),
            config.sync.cache_key.clone(),
        );
        Arc::new(AppState {
            engine: Arc::new(engine),
            config,
            token,
        })
    }
}
