use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS; the presentation layer talks to us from here.
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the events API, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Bearer token to start with. The presentation layer may replace it at runtime.
    pub api_token: Option<String>,
    pub timeout_seconds: u64,
    /// Attempts per request for network errors, 429 and 5xx responses.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Single cache key holding the serialized event collection.
    pub cache_key: String,
    /// Whether the periodic reconcile worker runs.
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8787".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/event-cache.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            remote: RemoteConfig {
                base_url: env::var("REMOTE_API_URL")
                    .map_err(|_| ConfigError::MissingEnv("REMOTE_API_URL".to_string()))
                    .and_then(|raw| {
                        url::Url::parse(&raw)
                            .map(|_| raw)
                            .map_err(|_| ConfigError::InvalidValue("REMOTE_API_URL".to_string()))
                    })?,
                api_token: env::var("REMOTE_API_TOKEN").ok().filter(|t| !t.is_empty()),
                timeout_seconds: env::var("REMOTE_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
                max_retries: env::var("REMOTE_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3u32),
            },
            sync: SyncConfig {
                cache_key: env::var("EVENT_CACHE_KEY").unwrap_or_else(|_| "events".to_string()),
                enabled: match env::var("SYNC_ENABLED") {
                    Ok(v) => parse_flag(&v).unwrap_or(true),
                    Err(_) => true,
                },
                interval_seconds: env::var("SYNC_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
            },
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8787,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/event-cache.db".to_string(),
                max_connections: 5,
            },
            remote: RemoteConfig {
                base_url: "http://localhost:8000/api".to_string(),
                api_token: None,
                timeout_seconds: 30,
                max_retries: 3,
            },
            sync: SyncConfig {
                cache_key: "events".to_string(),
                enabled: true,
                interval_seconds: 300,
            },
        }
    }
}
