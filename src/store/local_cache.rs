//! Small TTL key/value store over the local `cache` table.
//!
//! This is the low-traffic sibling of the cache tier: geo lookups, AI
//! cooldown markers and the cached model list live here, not in the
//! dashboard's generic/slot namespaces.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;

use crate::utils::now_ts;

pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let now = now_ts();
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, expires_at FROM cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((value, expires_at)) if expires_at > now => {
                Ok(serde_json::from_str(&value).ok())
            }
            Some(_) => {
                // Expired entry, drop it eagerly.
                sqlx::query("DELETE FROM cache WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn set_raw(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<(), sqlx::Error> {
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache (key, value, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(now + ttl_seconds.max(1))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, sqlx::Error> {
        Ok(self
            .get_raw(key)
            .await?
            .and_then(|v| serde_json::from_value(v).ok()))
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: i64,
    ) -> Result<(), sqlx::Error> {
        let json = serde_json::to_value(value)
            .map_err(|e| sqlx::Error::Protocol(format!("cache serialize failed: {}", e)))?;
        self.set_raw(key, &json, ttl_seconds).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn contains(&self, key: &str) -> Result<bool, sqlx::Error> {
        Ok(self.get_raw(key).await?.is_some())
    }

    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM cache WHERE expires_at < ?")
            .bind(now_ts())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    #[tokio::test]
    async fn ttl_round_trip() {
        let pool = create_memory_pool().await.unwrap();
        let cache = LocalCache::new(pool);

        cache.set("k", &serde_json::json!({"v": 1}), 60).await.unwrap();
        let value: Option<serde_json::Value> = cache.get("k").await.unwrap();
        assert_eq!(value.unwrap()["v"], 1);
        assert!(cache.contains("k").await.unwrap());

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let pool = create_memory_pool().await.unwrap();
        let cache = LocalCache::new(pool.clone());

        cache.set("k", &serde_json::json!(1), 60).await.unwrap();
        // Force the entry into the past.
        sqlx::query("UPDATE cache SET expires_at = ? WHERE key = 'k'")
            .bind(now_ts() - 10)
            .execute(&pool)
            .await
            .unwrap();

        let value: Option<serde_json::Value> = cache.get("k").await.unwrap();
        assert!(value.is_none());
        // The expired row was dropped eagerly.
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
