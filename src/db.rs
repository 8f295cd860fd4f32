//! Local SQLite store: cache mirror, mutable configuration and audit trails.
//!
//! The table names and columns are contractual (external tooling introspects
//! them); see the schema bootstrap below before renaming anything.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub async fn create_pool(path: &str) -> Result<SqlitePool, sqlx::Error> {
    if path != ":memory:"
        && let Some(parent) = Path::new(path).parent()
    {
        let _ = std::fs::create_dir_all(parent);
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests. A single connection keeps the `:memory:`
/// database alive for the pool's lifetime.
pub async fn create_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT DEFAULT '',
            updated_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS cache (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires_at)",
        r#"
        CREATE TABLE IF NOT EXISTS generic_cache (
            key TEXT PRIMARY KEY,
            data BLOB NOT NULL,
            snapshot_time INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_generic_cache_expires ON generic_cache(expires_at)",
        r#"
        CREATE TABLE IF NOT EXISTS slot_cache (
            metric TEXT NOT NULL,
            window TEXT NOT NULL,
            slot_start INTEGER NOT NULL,
            slot_end INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (metric, window, slot_start)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS stats_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_type TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_stats_type_time ON stats_snapshots(snapshot_type, created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS security_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            username TEXT DEFAULT '',
            operator TEXT DEFAULT '',
            reason TEXT DEFAULT '',
            context TEXT DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_security_audit_time ON security_audit(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_security_audit_user ON security_audit(user_id)",
        r#"
        CREATE TABLE IF NOT EXISTS ai_audit_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scan_id TEXT NOT NULL,
            status TEXT NOT NULL,
            window TEXT DEFAULT '1h',
            total_scanned INTEGER DEFAULT 0,
            total_processed INTEGER DEFAULT 0,
            banned_count INTEGER DEFAULT 0,
            warned_count INTEGER DEFAULT 0,
            skipped_count INTEGER DEFAULT 0,
            error_count INTEGER DEFAULT 0,
            dry_run INTEGER DEFAULT 1,
            elapsed_seconds REAL DEFAULT 0,
            error_message TEXT DEFAULT '',
            details TEXT DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_ai_audit_logs_time ON ai_audit_logs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_ai_audit_logs_status ON ai_audit_logs(status)",
        r#"
        CREATE TABLE IF NOT EXISTS auto_group_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            username TEXT DEFAULT '',
            old_group TEXT DEFAULT 'default',
            new_group TEXT NOT NULL,
            action TEXT NOT NULL,
            source TEXT DEFAULT '',
            operator TEXT DEFAULT 'system',
            created_at INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_auto_group_logs_time ON auto_group_logs(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_auto_group_logs_user ON auto_group_logs(user_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::debug!("local store schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let pool = create_memory_pool().await.unwrap();
        // Running the DDL twice must not fail.
        init_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        for expected in [
            "ai_audit_logs",
            "auto_group_logs",
            "cache",
            "config",
            "generic_cache",
            "security_audit",
            "slot_cache",
            "stats_snapshots",
        ] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }
}
