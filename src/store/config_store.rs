//! Mutable user-editable configuration, persisted as JSON values in the local
//! `config` table (AI ban settings, auto-group rules, selected models).

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;

use crate::utils::now_ts;

pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(value,)| serde_json::from_str(&value).ok()))
    }

    pub async fn set_raw(
        &self,
        key: &str,
        value: &serde_json::Value,
        description: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO config (key, value, description, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(description)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Typed read; a missing key or undecodable stored value reads as the
    /// type's default so config schema evolution never breaks startup.
    pub async fn get<T>(&self, key: &str) -> Result<T, sqlx::Error>
    where
        T: DeserializeOwned + Default,
    {
        Ok(self
            .get_raw(key)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default())
    }

    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), sqlx::Error>
    where
        T: Serialize,
    {
        let json = serde_json::to_value(value)
            .map_err(|e| sqlx::Error::Protocol(format!("config serialize failed: {}", e)))?;
        self.set_raw(key, &json, "").await
    }

    /// Merge a JSON object patch into the stored object (creating it when
    /// absent). Non-object stored values are replaced wholesale.
    pub async fn merge(
        &self,
        key: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, sqlx::Error> {
        let mut current = self
            .get_raw(key)
            .await?
            .unwrap_or_else(|| serde_json::json!({}));
        if let (Some(target), Some(source)) = (current.as_object_mut(), patch.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        } else {
            current = patch.clone();
        }
        self.set_raw(key, &current, "").await?;
        Ok(current)
    }

    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM config WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Sample {
        enabled: bool,
        name: String,
    }

    #[tokio::test]
    async fn typed_round_trip_and_default() {
        let pool = create_memory_pool().await.unwrap();
        let store = ConfigStore::new(pool);

        let missing: Sample = store.get("nope").await.unwrap();
        assert_eq!(missing, Sample::default());

        let sample = Sample { enabled: true, name: "x".into() };
        store.set("sample", &sample).await.unwrap();
        let loaded: Sample = store.get("sample").await.unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn merge_patches_objects() {
        let pool = create_memory_pool().await.unwrap();
        let store = ConfigStore::new(pool);

        store
            .set_raw("cfg", &serde_json::json!({"a": 1, "b": 2}), "")
            .await
            .unwrap();
        let merged = store.merge("cfg", &serde_json::json!({"b": 3, "c": 4})).await.unwrap();
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn stale_schema_reads_as_default() {
        let pool = create_memory_pool().await.unwrap();
        let store = ConfigStore::new(pool);

        store.set_raw("cfg", &serde_json::json!([1, 2, 3]), "").await.unwrap();
        let loaded: Sample = store.get("cfg").await.unwrap();
        assert_eq!(loaded, Sample::default());
    }
}
