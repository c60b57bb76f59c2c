use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Key-value store for serialized collections. Each key is read and written
/// as a whole.
#[async_trait]
pub trait LocalCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, blob: &str) -> AppResult<()>;
    async fn remove(&self, key: &str) -> AppResult<()>;
}

// ============================================================================
// SQLite-backed cache (`cache_entries` table)
// ============================================================================

pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalCache for SqliteCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, blob: &str) -> AppResult<()> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(blob)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }
}

// ============================================================================
// In-process cache
// ============================================================================

/// Cache that lives only as long as the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, blob: &str) -> AppResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sqlite_cache() -> SqliteCache {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteCache::new(pool)
    }

    #[tokio::test]
    async fn sqlite_cache_upserts_whole_blob() {
        let cache = sqlite_cache().await;
        assert_eq!(cache.get("events").await.unwrap(), None);

        cache.set("events", "[1]").await.unwrap();
        cache.set("events", "[1,2]").await.unwrap();
        assert_eq!(cache.get("events").await.unwrap().as_deref(), Some("[1,2]"));

        cache.remove("events").await.unwrap();
        assert_eq!(cache.get("events").await.unwrap(), None);
    }

    #[test]
    fn memory_cache_keys_are_independent() {
        tokio_test::block_on(async {
            let cache = MemoryCache::new();
            cache.set("a", "1").await.unwrap();
            cache.set("b", "2").await.unwrap();
            cache.remove("a").await.unwrap();

            assert_eq!(cache.get("a").await.unwrap(), None);
            assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));
        });
    }
}
