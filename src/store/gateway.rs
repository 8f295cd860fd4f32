//! Gateway database client.
//!
//! One query surface over the two supported engines: MySQL through
//! `mysql_async` and PostgreSQL through `sqlx`. Callers pass SQL written with
//! `?` placeholders; the Postgres arm rewrites them to `$n`. Rows come back
//! as positional [`SqlRow`]s.

use mysql_async::prelude::Queryable;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Decode, Row, TypeInfo, ValueRef};
use std::time::Duration;

use crate::config::GatewayConfig;
use crate::store::dialect::GatewayDialect;
use crate::store::value::{SqlParam, SqlRow, SqlValue, mysql_row_to_sql, sql_param_to_mysql};

pub type StoreResult<T> = Result<T, StoreError>;

/// A failed gateway query. `Transient` failures (connection loss, pool
/// timeouts, deadlocks) are retryable by the engine layer; `Permanent`
/// failures (bad SQL, missing tables) are not.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("transient query failure: {0}")]
    Transient(String),
    #[error("permanent query failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

fn classify_mysql(err: mysql_async::Error) -> StoreError {
    match &err {
        mysql_async::Error::Io(_) => StoreError::Transient(err.to_string()),
        mysql_async::Error::Driver(_) => StoreError::Transient(err.to_string()),
        mysql_async::Error::Server(server) if server.code == 1213 || server.code == 1205 => {
            // Deadlock / lock wait timeout.
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

fn classify_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

enum GatewayBackend {
    MySql(mysql_async::Pool),
    Postgres(sqlx::PgPool),
}

pub struct GatewayClient {
    backend: GatewayBackend,
    dialect: GatewayDialect,
}

impl GatewayClient {
    /// Build the pooled client. Both backends connect lazily so the sidecar
    /// can start while the gateway database is briefly unavailable.
    pub fn connect(config: &GatewayConfig) -> StoreResult<Self> {
        let dialect = GatewayDialect::parse(&config.engine)
            .ok_or_else(|| StoreError::Permanent(format!("unknown engine {}", config.engine)))?;

        let backend = match dialect {
            GatewayDialect::MySql => {
                let pool_max = config.max_connections.max(1) as usize;
                let constraints = mysql_async::PoolConstraints::new(1, pool_max)
                    .ok_or_else(|| StoreError::Permanent("invalid pool constraints".into()))?;
                let opts = mysql_async::OptsBuilder::default()
                    .ip_or_hostname(&config.host)
                    .tcp_port(config.port)
                    .user(Some(&config.user))
                    .pass(Some(&config.password))
                    .db_name(Some(&config.database))
                    .prefer_socket(false)
                    .tcp_keepalive(Some(30_000_u32))
                    .tcp_nodelay(true)
                    .pool_opts(
                        mysql_async::PoolOpts::default()
                            .with_constraints(constraints)
                            .with_inactive_connection_ttl(Duration::from_secs(300))
                            .with_ttl_check_interval(Duration::from_secs(60)),
                    );
                GatewayBackend::MySql(mysql_async::Pool::new(opts))
            }
            GatewayDialect::Postgres => {
                let options = PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .password(&config.password)
                    .database(&config.database);
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections.max(1))
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_lazy_with(options);
                GatewayBackend::Postgres(pool)
            }
        };

        Ok(Self { backend, dialect })
    }

    pub fn dialect(&self) -> GatewayDialect {
        self.dialect
    }

    pub async fn query(&self, sql: &str, params: Vec<SqlParam>) -> StoreResult<Vec<SqlRow>> {
        match &self.backend {
            GatewayBackend::MySql(pool) => {
                let mut conn = pool.get_conn().await.map_err(classify_mysql)?;
                let rows: Vec<mysql_async::Row> = conn
                    .exec(sql, mysql_params(&params))
                    .await
                    .map_err(classify_mysql)?;
                drop(conn);
                Ok(rows.into_iter().map(mysql_row_to_sql).collect())
            }
            GatewayBackend::Postgres(pool) => {
                let rewritten = self.dialect.rewrite_placeholders(sql);
                let query = bind_pg(sqlx::query(&rewritten), &params);
                let rows = query.fetch_all(pool).await.map_err(classify_sqlx)?;
                rows.iter().map(pg_row_to_sql).collect()
            }
        }
    }

    /// Convenience for single-row aggregates; missing rows read as all-NULL.
    pub async fn query_one(&self, sql: &str, params: Vec<SqlParam>) -> StoreResult<SqlRow> {
        let mut rows = self.query(sql, params).await?;
        if rows.is_empty() {
            Ok(SqlRow::new(Vec::new()))
        } else {
            Ok(rows.swap_remove(0))
        }
    }

    pub async fn execute(&self, sql: &str, params: Vec<SqlParam>) -> StoreResult<u64> {
        match &self.backend {
            GatewayBackend::MySql(pool) => {
                let mut conn = pool.get_conn().await.map_err(classify_mysql)?;
                conn.exec_drop(sql, mysql_params(&params))
                    .await
                    .map_err(classify_mysql)?;
                let affected = conn.affected_rows();
                drop(conn);
                Ok(affected)
            }
            GatewayBackend::Postgres(pool) => {
                let rewritten = self.dialect.rewrite_placeholders(sql);
                let query = bind_pg(sqlx::query(&rewritten), &params);
                let result = query.execute(pool).await.map_err(classify_sqlx)?;
                Ok(result.rows_affected())
            }
        }
    }

    /// Run several statements in one transaction; returns the total number of
    /// affected rows. Used by the Writer for multi-table mutations (ban +
    /// token disable).
    pub async fn execute_tx(&self, statements: Vec<(String, Vec<SqlParam>)>) -> StoreResult<u64> {
        match &self.backend {
            GatewayBackend::MySql(pool) => {
                let mut conn = pool.get_conn().await.map_err(classify_mysql)?;
                let mut tx = conn
                    .start_transaction(mysql_async::TxOpts::default())
                    .await
                    .map_err(classify_mysql)?;
                let mut affected = 0u64;
                for (sql, params) in &statements {
                    tx.exec_drop(sql.as_str(), mysql_params(params))
                        .await
                        .map_err(classify_mysql)?;
                    affected += tx.affected_rows();
                }
                tx.commit().await.map_err(classify_mysql)?;
                drop(conn);
                Ok(affected)
            }
            GatewayBackend::Postgres(pool) => {
                let mut tx = pool.begin().await.map_err(classify_sqlx)?;
                let mut affected = 0u64;
                for (sql, params) in &statements {
                    let rewritten = self.dialect.rewrite_placeholders(sql);
                    let query = bind_pg(sqlx::query(&rewritten), params);
                    let result = query.execute(&mut *tx).await.map_err(classify_sqlx)?;
                    affected += result.rows_affected();
                }
                tx.commit().await.map_err(classify_sqlx)?;
                Ok(affected)
            }
        }
    }
}

fn mysql_params(params: &[SqlParam]) -> mysql_async::Params {
    if params.is_empty() {
        mysql_async::Params::Empty
    } else {
        mysql_async::Params::Positional(params.iter().map(sql_param_to_mysql).collect())
    }
}

fn bind_pg<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let mut query = query;
    for param in params {
        query = match param {
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn pg_row_to_sql(row: &PgRow) -> StoreResult<SqlRow> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| StoreError::Permanent(e.to_string()))?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let decoded = match type_name.as_str() {
            "BOOL" => <bool as Decode<sqlx::Postgres>>::decode(raw)
                .map(|v| SqlValue::Int(v as i64)),
            "INT2" => <i16 as Decode<sqlx::Postgres>>::decode(raw)
                .map(|v| SqlValue::Int(v as i64)),
            "INT4" => <i32 as Decode<sqlx::Postgres>>::decode(raw)
                .map(|v| SqlValue::Int(v as i64)),
            "INT8" => <i64 as Decode<sqlx::Postgres>>::decode(raw).map(SqlValue::Int),
            "FLOAT4" => <f32 as Decode<sqlx::Postgres>>::decode(raw)
                .map(|v| SqlValue::Float(v as f64)),
            "FLOAT8" => <f64 as Decode<sqlx::Postgres>>::decode(raw).map(SqlValue::Float),
            "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" | "JSON" | "JSONB" => {
                <String as Decode<sqlx::Postgres>>::decode(raw).map(SqlValue::Text)
            }
            // Aggregates are cast to bigint/double in the dialect helpers, so
            // NUMERIC here means a query bypassed them.
            other => {
                return Err(StoreError::Permanent(format!(
                    "unhandled postgres column type {} at index {}",
                    other, idx
                )));
            }
        };
        values.push(decoded.map_err(|e| StoreError::Permanent(e.to_string()))?);
    }
    Ok(SqlRow::new(values))
}
