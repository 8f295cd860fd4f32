//! Two-namespace read-through cache.
//!
//! Generic namespace: `key -> JSON blob + absolute expiry`. Slotted
//! namespace: one immutable blob per `(metric, window, slot_start)`.
//!
//! Backends: Redis is the preferred primary, the local SQLite tables
//! (`generic_cache`, `slot_cache`) are the durable mirror and fallback.
//! Writes go mirror-then-primary; reads try the primary and repopulate it on
//! a mirror hit. Every operation degrades instead of failing: a dead Redis
//! or a broken mirror row is a warning, not an error.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;

use crate::cache::single_flight::SingleFlight;
use crate::cache::slots::{SlotPlan, SlotSpan, plan};
use crate::utils::{Window, now_ts};

/// Slot lookup result for one `(metric, window)` at a given `now`.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub missing: Vec<SlotSpan>,
    pub cached: Vec<(SlotSpan, Value)>,
    pub live: Option<SlotSpan>,
    pub window_start: i64,
}

pub struct CacheTier {
    redis: Option<ConnectionManager>,
    mirror: SqlitePool,
    flight: SingleFlight<Value>,
}

impl CacheTier {
    pub fn new(mirror: SqlitePool, redis: Option<ConnectionManager>) -> Arc<Self> {
        if redis.is_none() {
            tracing::info!("cache tier running without redis; SQLite mirror only");
        }
        Arc::new(Self { redis, mirror, flight: SingleFlight::new() })
    }

    pub async fn connect_redis(url: &str) -> Option<ConnectionManager> {
        match redis::Client::open(url) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(manager) => {
                    tracing::info!("redis cache connected");
                    Some(manager)
                }
                Err(e) => {
                    tracing::warn!("redis unavailable, falling back to mirror only: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("invalid redis url: {}", e);
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Generic namespace
    // -----------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            match conn.get::<_, Option<String>>(key).await {
                Ok(Some(raw)) => {
                    if let Ok(value) = serde_json::from_str(&raw) {
                        return Some(value);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("redis get failed for {}: {}", key, e),
            }
        }

        // Mirror fallback; repopulate the primary on a hit.
        let now = now_ts();
        let row = sqlx::query_as::<_, (Vec<u8>, i64)>(
            "SELECT data, expires_at FROM generic_cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.mirror)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("cache mirror read failed for {}: {}", key, e);
            None
        });

        let (data, expires_at) = row?;
        let value: Value = serde_json::from_slice(&data).ok()?;
        if let Some(manager) = &self.redis {
            let remaining = (expires_at - now).max(1) as u64;
            let mut conn = manager.clone();
            if let Err(e) = conn
                .set_ex::<_, _, ()>(key, value.to_string(), remaining)
                .await
            {
                tracing::debug!("redis repopulate failed for {}: {}", key, e);
            }
        }
        Some(value)
    }

    pub async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) {
        let now = now_ts();
        let expires_at = now + ttl_seconds.max(1) as i64;
        let data = value.to_string();

        // Mirror first; the primary is best-effort.
        if let Err(e) = sqlx::query(
            r#"
            INSERT OR REPLACE INTO generic_cache (key, data, snapshot_time, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(data.as_bytes())
        .bind(now)
        .bind(expires_at)
        .execute(&self.mirror)
        .await
        {
            tracing::warn!("cache mirror write failed for {}: {}", key, e);
        }

        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            if let Err(e) = conn
                .set_ex::<_, _, ()>(key, data, ttl_seconds.max(1))
                .await
            {
                tracing::warn!("redis set failed for {}: {}", key, e);
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = sqlx::query("DELETE FROM generic_cache WHERE key = ?")
            .bind(key)
            .execute(&self.mirror)
            .await
        {
            tracing::warn!("cache mirror delete failed for {}: {}", key, e);
        }
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!("redis delete failed for {}: {}", key, e);
            }
        }
    }

    /// Drop every generic entry under a key prefix. Slot entries are NOT
    /// touched: their inputs are append-only historical facts.
    pub async fn clear_prefix(&self, prefix: &str) -> u64 {
        let pattern = format!("{}%", prefix.replace('%', ""));
        let cleared = match sqlx::query("DELETE FROM generic_cache WHERE key LIKE ?")
            .bind(&pattern)
            .execute(&self.mirror)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                tracing::warn!("cache mirror clear failed for {}: {}", prefix, e);
                0
            }
        };

        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let scan_pattern = format!("{}*", prefix);
            let keys: Vec<String> = match conn.scan_match::<_, String>(&scan_pattern).await {
                Ok(mut iter) => {
                    let mut keys = Vec::new();
                    while let Some(key) = iter.next_item().await {
                        keys.push(key);
                    }
                    keys
                }
                Err(e) => {
                    tracing::warn!("redis scan failed for {}: {}", prefix, e);
                    Vec::new()
                }
            };
            if !keys.is_empty() {
                let mut conn = manager.clone();
                if let Err(e) = conn.del::<_, ()>(keys).await {
                    tracing::warn!("redis prefix delete failed for {}: {}", prefix, e);
                }
            }
        }

        cleared
    }

    /// Read-through with single-flight coalescing: at most one computation
    /// per key runs at a time; all waiters receive the same blob.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        ttl_seconds: u64,
        compute: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        self.flight
            .run(key, || async {
                // Double-check inside the flight: a racing leader may have
                // populated the key while we queued.
                if let Some(hit) = self.get(key).await {
                    return Ok(hit);
                }
                let value = compute().await?;
                self.set(key, &value, ttl_seconds).await;
                Ok(value)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Slotted namespace
    // -----------------------------------------------------------------------

    fn slot_key(metric: &str, window: Window, slot_start: i64) -> String {
        format!("slot:{}:{}:{}", metric, window.as_str(), slot_start)
    }

    /// Persist one finalized slot. Finalized slots are immutable: a second
    /// write for the same `(metric, window, slot_start)` is a no-op.
    pub async fn set_slot(&self, metric: &str, window: Window, span: SlotSpan, value: &Value) {
        let data = value.to_string();
        if let Err(e) = sqlx::query(
            r#"
            INSERT OR IGNORE INTO slot_cache (metric, window, slot_start, slot_end, data)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(metric)
        .bind(window.as_str())
        .bind(span.start)
        .bind(span.end)
        .bind(data.as_bytes())
        .execute(&self.mirror)
        .await
        {
            tracing::warn!("slot mirror write failed for {}:{}: {}", metric, span.start, e);
        }

        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let key = Self::slot_key(metric, window, span.start);
            // Finalized slots do not expire; bound redis usage to the window
            // length plus slack so dead windows eventually drain.
            let ttl = (window.seconds() as u64) * 2;
            if let Err(e) = conn.set_ex::<_, _, ()>(key, data, ttl).await {
                tracing::debug!("redis slot write failed: {}", e);
            }
        }
    }

    pub async fn get_slot(
        &self,
        metric: &str,
        window: Window,
        slot_start: i64,
    ) -> Option<(i64, Value)> {
        let row: Option<(i64, Vec<u8>)> = sqlx::query_as(
            "SELECT slot_end, data FROM slot_cache WHERE metric = ? AND window = ? AND slot_start = ?",
        )
        .bind(metric)
        .bind(window.as_str())
        .bind(slot_start)
        .fetch_optional(&self.mirror)
        .await
        .unwrap_or(None);
        if let Some((slot_end, data)) = row {
            return serde_json::from_slice(&data).ok().map(|v| (slot_end, v));
        }

        // Mirror miss or failure: try the primary copy.
        if let Some(manager) = &self.redis {
            let mut conn = manager.clone();
            let key = Self::slot_key(metric, window, slot_start);
            if let Ok(Some(raw)) = conn.get::<_, Option<String>>(&key).await
                && let Ok(value) = serde_json::from_str::<Value>(&raw)
            {
                return Some((slot_start + crate::cache::slots::SLOT_SECONDS, value));
            }
        }
        None
    }

    /// Plan the window and split its finalized slots into cached and missing.
    pub async fn missing_slots(&self, metric: &str, window: Window, now: i64) -> SlotState {
        let SlotPlan { window_start, finalized, live } = plan(window, now);

        let rows: Vec<(i64, i64, Vec<u8>)> = sqlx::query_as(
            r#"
            SELECT slot_start, slot_end, data
            FROM slot_cache
            WHERE metric = ? AND window = ? AND slot_start >= ?
            "#,
        )
        .bind(metric)
        .bind(window.as_str())
        .bind(window_start)
        .fetch_all(&self.mirror)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("slot mirror scan failed for {}: {}", metric, e);
            Vec::new()
        });

        let mut by_start = std::collections::HashMap::new();
        for (slot_start, slot_end, data) in rows {
            if let Ok(value) = serde_json::from_slice::<Value>(&data) {
                by_start.insert(slot_start, (slot_end, value));
            }
        }

        let mut missing = Vec::new();
        let mut cached = Vec::new();
        for span in finalized {
            match by_start.remove(&span.start) {
                Some((_, value)) => cached.push((span, value)),
                None => missing.push(span),
            }
        }

        SlotState { missing, cached, live, window_start }
    }

    /// Expired generic rows; called by the maintenance task.
    pub async fn cleanup_expired(&self) -> u64 {
        match sqlx::query("DELETE FROM generic_cache WHERE expires_at < ?")
            .bind(now_ts())
            .execute(&self.mirror)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                tracing::warn!("generic cache cleanup failed: {}", e);
                0
            }
        }
    }

    /// Slot rows older than the longest incremental window have no readers
    /// left; drop them.
    pub async fn cleanup_stale_slots(&self, now: i64) -> u64 {
        let horizon = now - Window::D14.seconds() - 86400;
        match sqlx::query("DELETE FROM slot_cache WHERE slot_end < ?")
            .bind(horizon)
            .execute(&self.mirror)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                tracing::warn!("slot cache cleanup failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::slots::SLOT_SECONDS;
    use crate::db::create_memory_pool;
    use serde_json::json;

    async fn tier() -> Arc<CacheTier> {
        CacheTier::new(create_memory_pool().await.unwrap(), None)
    }

    #[tokio::test]
    async fn generic_round_trip_and_prefix_clear() {
        let tier = tier().await;

        tier.set("dashboard:overview:24h", &json!({"users": 5}), 60).await;
        tier.set("dashboard:usage:24h", &json!({"requests": 9}), 60).await;
        tier.set("risk:lb:1h:requests", &json!([1, 2]), 60).await;

        assert_eq!(tier.get("dashboard:overview:24h").await.unwrap()["users"], 5);

        let cleared = tier.clear_prefix("dashboard:").await;
        assert_eq!(cleared, 2);
        assert!(tier.get("dashboard:overview:24h").await.is_none());
        assert!(tier.get("dashboard:usage:24h").await.is_none());
        // Other prefixes survive.
        assert!(tier.get("risk:lb:1h:requests").await.is_some());
    }

    #[tokio::test]
    async fn expired_generic_entries_miss() {
        let tier = tier().await;
        tier.set("k", &json!(1), 1).await;
        // Rewind the expiry rather than sleeping.
        sqlx::query("UPDATE generic_cache SET expires_at = ? WHERE key = 'k'")
            .bind(now_ts() - 5)
            .execute(&tier.mirror)
            .await
            .unwrap();
        assert!(tier.get("k").await.is_none());
    }

    #[tokio::test]
    async fn finalized_slots_are_immutable() {
        let tier = tier().await;
        let span = SlotSpan { start: 3_600_000, end: 3_600_000 + SLOT_SECONDS };

        tier.set_slot("usage_stats", Window::D3, span, &json!({"total": 1})).await;
        tier.set_slot("usage_stats", Window::D3, span, &json!({"total": 999})).await;

        let (_, value) = tier.get_slot("usage_stats", Window::D3, span.start).await.unwrap();
        assert_eq!(value["total"], 1);
    }

    #[tokio::test]
    async fn missing_slots_partition_is_exact() {
        let tier = tier().await;
        let now = 1_700_003_333;
        let plan = crate::cache::slots::plan(Window::D3, now);

        // Cache every other finalized slot.
        for (i, span) in plan.finalized.iter().enumerate() {
            if i % 2 == 0 {
                tier.set_slot("usage_stats", Window::D3, *span, &json!({"i": i})).await;
            }
        }

        let state = tier.missing_slots("usage_stats", Window::D3, now).await;
        assert_eq!(state.cached.len() + state.missing.len(), plan.finalized.len());
        assert_eq!(state.cached.len(), plan.finalized.len().div_ceil(2));
        assert_eq!(state.live, plan.live);
        for (span, _) in &state.cached {
            assert!(plan.finalized.contains(span));
        }
    }

    #[tokio::test]
    async fn get_or_compute_runs_once_for_concurrent_misses() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let tier = tier().await;
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tier = Arc::clone(&tier);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                tier.get_or_compute("cold:key", 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok::<_, ()>(json!({"x": 1}))
                })
                .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap()["x"], 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
