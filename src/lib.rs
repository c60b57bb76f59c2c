//! Offline-first synchronization of activity events between a remote events
//! API and a local cache, exposed to presentation layers over a small HTTP API.

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;

use config::Config;
use services::collaborators::SharedToken;
use services::EventSyncEngine;

pub struct AppState {
    pub engine: Arc<EventSyncEngine>,
    pub config: Config,
    /// Bearer token used by the remote gateway; replaced via the session route.
    pub token: SharedToken,
}
