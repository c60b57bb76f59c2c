//! Startup helpers:
//! - cache database connection + migrations
//! - background sync workers
//!
//! Keeps `main.rs` down to wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::Config;
use crate::AppState;

/// Interval at which lifecycle states are recomputed between sync passes.
const LIFECYCLE_TICK: Duration = Duration::from_secs(60);

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            return format!("(redacted){}", &db_url[at_pos + 1..]);
        }
        "(redacted)".to_string()
    }
}

/// Open the SQLite file backing the local event cache and run migrations.
///
/// The parent directory is created when missing so a fresh install can start
/// with the default `sqlite://data/event-cache.db`.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Opening event cache database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let existed = db_file_path.exists();
    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if existed {
        tracing::info!("Using existing cache file: {}", db_file_path.display());
    } else {
        tracing::info!("Created cache file: {}", db_file_path.display());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn background workers:
/// - periodic reconcile (uploads offline events, retries pending edits)
/// - lifecycle ticker (moves events between upcoming/active/past as time passes)
///
/// Each worker exits when the broadcast `shutdown` fires. The returned
/// handles let the caller wait for them.
pub fn spawn_background_workers(
    state: Arc<AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // Reconcile worker
    if state.config.sync.enabled {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        let interval = Duration::from_secs(state.config.sync.interval_seconds.max(1));
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Sync worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                tracing::debug!("Starting periodic reconcile");
                let report = state.engine.reconcile().await;
                if report.created.is_empty() && report.updated.is_empty() && report.failures.is_empty() {
                    tracing::debug!("Nothing to reconcile");
                } else {
                    tracing::info!(
                        "Reconcile finished: {} uploaded, {} updated, {} failed",
                        report.created.len(),
                        report.updated.len(),
                        report.failures.len()
                    );
                }
            }
        }));
    } else {
        tracing::info!("Periodic sync disabled (SYNC_ENABLED=false)");
    }

    // Lifecycle ticker
    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Lifecycle ticker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(LIFECYCLE_TICK) => {}
                }
                state.engine.refresh_lifecycle().await;
            }
        }));
    }

    handles
}
