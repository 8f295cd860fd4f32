//! Read-only query surface over the gateway database.
//!
//! Every operation takes an explicit half-open time window `[start, end)` and
//! is parameterized. Callers never see SQL; they get typed rows. Transient
//! query failures are retried once here, permanent failures surface
//! unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::gateway::*;
use crate::store::dialect::GatewayDialect;
use crate::store::gateway::{GatewayClient, StoreResult};
use crate::store::value::{SqlParam, SqlRow};

pub struct LogStore {
    client: Arc<GatewayClient>,
}

impl LogStore {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    pub fn dialect(&self) -> GatewayDialect {
        self.client.dialect()
    }

    async fn query(&self, sql: &str, params: Vec<SqlParam>) -> StoreResult<Vec<SqlRow>> {
        match self.client.query(sql, params.clone()).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_transient() => {
                tracing::warn!("transient gateway query failure, retrying once: {}", e);
                self.client.query(sql, params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn query_one(&self, sql: &str, params: Vec<SqlParam>) -> StoreResult<SqlRow> {
        let mut rows = self.query(sql, params).await?;
        if rows.is_empty() { Ok(SqlRow::new(Vec::new())) } else { Ok(rows.swap_remove(0)) }
    }

    // -----------------------------------------------------------------------
    // Overview counters
    // -----------------------------------------------------------------------

    pub async fn count_users_total(&self) -> StoreResult<i64> {
        let row = self
            .query_one("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL", vec![])
            .await?;
        Ok(row.i64(0))
    }

    /// Distinct users with a successful request in the window, excluding
    /// soft-deleted and disabled accounts.
    pub async fn count_active_users(&self, start: i64, end: i64) -> StoreResult<i64> {
        let sql = r#"
            SELECT COUNT(DISTINCT l.user_id)
            FROM logs l
            INNER JOIN users u ON u.id = l.user_id AND u.deleted_at IS NULL
            WHERE l.created_at >= ? AND l.created_at < ?
              AND l.type = 2
              AND l.user_id IS NOT NULL
              AND COALESCE(u.status, 1) = 1
        "#;
        let row = self.query_one(sql, vec![start.into(), end.into()]).await?;
        Ok(row.i64(0))
    }

    /// `(total, enabled)` over non-deleted tokens.
    pub async fn token_totals(&self) -> StoreResult<(i64, i64)> {
        let d = self.dialect();
        let sql = format!(
            "SELECT COUNT(*), {} FROM tokens WHERE deleted_at IS NULL",
            d.sum_i64("CASE WHEN status = 1 THEN 1 ELSE 0 END"),
        );
        let row = self.query_one(&sql, vec![]).await?;
        Ok((row.i64(0), row.i64(1)))
    }

    pub async fn count_active_tokens(&self, start: i64, end: i64) -> StoreResult<i64> {
        let sql = r#"
            SELECT COUNT(DISTINCT l.token_id)
            FROM logs l
            INNER JOIN tokens t ON t.id = l.token_id AND t.deleted_at IS NULL
            WHERE l.created_at >= ? AND l.created_at < ?
              AND l.type = 2
              AND l.token_id IS NOT NULL
              AND COALESCE(t.status, 1) = 1
        "#;
        let row = self.query_one(sql, vec![start.into(), end.into()]).await?;
        Ok(row.i64(0))
    }

    pub async fn channel_totals(&self) -> StoreResult<(i64, i64)> {
        let d = self.dialect();
        let sql = format!(
            "SELECT COUNT(*), {} FROM channels",
            d.sum_i64("CASE WHEN status = 1 THEN 1 ELSE 0 END"),
        );
        let row = self.query_one(&sql, vec![]).await?;
        Ok((row.i64(0), row.i64(1)))
    }

    /// Distinct models across enabled abilities on enabled channels.
    pub async fn count_models(&self) -> StoreResult<i64> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT COUNT(DISTINCT a.model)
            FROM abilities a
            INNER JOIN channels c ON c.id = a.channel_id
            WHERE c.status = 1 AND COALESCE(a.enabled, {t}) = {t}
            "#,
            t = d.bool_true(),
        );
        let row = self.query_one(&sql, vec![]).await?;
        Ok(row.i64(0))
    }

    pub async fn redemption_totals(&self) -> StoreResult<(i64, i64)> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT COUNT(*), {}
            FROM redemptions
            WHERE deleted_at IS NULL
            "#,
            d.sum_i64("CASE WHEN redeemed_time = 0 OR redeemed_time IS NULL THEN 1 ELSE 0 END"),
        );
        let row = self.query_one(&sql, vec![]).await?;
        Ok((row.i64(0), row.i64(1)))
    }

    // -----------------------------------------------------------------------
    // Usage aggregates
    // -----------------------------------------------------------------------

    pub async fn usage_stats(&self, start: i64, end: i64) -> StoreResult<UsageTotals> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT COUNT(*), {quota}, {prompt}, {completion}, {avg_time}
            FROM logs
            WHERE created_at >= ? AND created_at < ? AND type = 2
            "#,
            quota = d.sum_i64("quota"),
            prompt = d.sum_i64("prompt_tokens"),
            completion = d.sum_i64("completion_tokens"),
            avg_time = d.avg_f64("use_time"),
        );
        let row = self.query_one(&sql, vec![start.into(), end.into()]).await?;
        Ok(UsageTotals {
            total_requests: row.i64(0),
            total_quota_used: row.i64(1),
            total_prompt_tokens: row.i64(2),
            total_completion_tokens: row.i64(3),
            average_response_time: row.f64(4),
        })
    }

    /// Top models by request count; ties break by quota desc then name asc.
    pub async fn model_usage(&self, start: i64, end: i64, limit: i64) -> StoreResult<Vec<ModelUsage>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT model_name, COUNT(*) AS request_count, {quota} AS quota_used,
                   {prompt} AS prompt_tokens, {completion} AS completion_tokens
            FROM logs
            WHERE created_at >= ? AND created_at < ? AND type = 2
              AND model_name IS NOT NULL AND model_name <> ''
            GROUP BY model_name
            ORDER BY request_count DESC, quota_used DESC, model_name ASC
            LIMIT ?
            "#,
            quota = d.sum_i64("quota"),
            prompt = d.sum_i64("prompt_tokens"),
            completion = d.sum_i64("completion_tokens"),
        );
        let rows = self
            .query(&sql, vec![start.into(), end.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ModelUsage {
                model_name: r.text(0),
                request_count: r.i64(1),
                quota_used: r.i64(2),
                prompt_tokens: r.i64(3),
                completion_tokens: r.i64(4),
            })
            .collect())
    }

    /// Top users by quota used; ties break by request count desc then id asc.
    pub async fn top_users(&self, start: i64, end: i64, limit: i64) -> StoreResult<Vec<UserRanking>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT l.user_id,
                   COALESCE(MAX(u.username), {fallback}) AS username,
                   COUNT(*) AS request_count,
                   {quota} AS quota_used
            FROM logs l
            LEFT JOIN users u ON l.user_id = u.id
            WHERE l.created_at >= ? AND l.created_at < ? AND l.type = 2
              AND l.user_id IS NOT NULL
            GROUP BY l.user_id
            ORDER BY quota_used DESC, request_count DESC, l.user_id ASC
            LIMIT ?
            "#,
            fallback = d.username_fallback("l.user_id"),
            quota = d.sum_i64("l.quota"),
        );
        let rows = self
            .query(&sql, vec![start.into(), end.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserRanking {
                user_id: r.i64(0),
                username: r.text(1),
                request_count: r.i64(2),
                quota_used: r.i64(3),
            })
            .collect())
    }

    /// Per-day aggregates over explicit bucket boundaries. The boundary
    /// timestamps are inlined in a CASE expression (server-generated
    /// integers); this mirrors the local-midnight bucketing of the upstream
    /// dashboard.
    pub async fn daily_counts(
        &self,
        ranges: &[(String, i64, i64)],
    ) -> StoreResult<Vec<(String, i64, i64, i64)>> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let d = self.dialect();
        let mut case = String::from("CASE ");
        for (date, start, end) in ranges {
            case.push_str(&format!(
                "WHEN created_at >= {} AND created_at < {} THEN '{}' ",
                start, end, date
            ));
        }
        case.push_str("END");

        let start = ranges.first().map(|r| r.1).unwrap_or(0);
        let end = ranges.last().map(|r| r.2).unwrap_or(0);
        let sql = format!(
            r#"
            SELECT {case} AS bucket_date, COUNT(*) AS request_count,
                   {quota} AS quota_used, COUNT(DISTINCT user_id) AS unique_users
            FROM logs
            WHERE created_at >= ? AND created_at < ? AND type = 2
            GROUP BY {case}
            HAVING {case} IS NOT NULL
            ORDER BY bucket_date ASC
            "#,
            case = case,
            quota = d.sum_i64("quota"),
        );
        let rows = self.query(&sql, vec![start.into(), end.into()]).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.text(0), r.i64(1), r.i64(2), r.i64(3)))
            .collect())
    }

    /// Per-hour aggregates keyed by `floor(created_at/3600)*3600`.
    pub async fn hourly_counts(
        &self,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<(i64, i64, i64, i64)>> {
        let d = self.dialect();
        let bucket = format!("{} * 3600", d.floor_div("created_at", "3600"));
        let sql = format!(
            r#"
            SELECT {bucket} AS hour_ts, COUNT(*) AS request_count,
                   {quota} AS quota_used, COUNT(DISTINCT user_id) AS unique_users
            FROM logs
            WHERE created_at >= ? AND created_at < ? AND type = 2
            GROUP BY hour_ts
            ORDER BY hour_ts ASC
            "#,
            bucket = bucket,
            quota = d.sum_i64("quota"),
        );
        let rows = self.query(&sql, vec![start.into(), end.into()]).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.i64(0), r.i64(1), r.i64(2), r.i64(3)))
            .collect())
    }

    pub async fn channel_status(&self) -> StoreResult<Vec<ChannelStatus>> {
        let sql = r#"
            SELECT id, name, status, type, balance, used_quota, response_time, test_time
            FROM channels
            ORDER BY status DESC, used_quota DESC
            LIMIT 20
        "#;
        let rows = self.query(sql, vec![]).await?;
        Ok(rows
            .into_iter()
            .map(|r| ChannelStatus {
                id: r.i64(0),
                name: if r.text(1).is_empty() { format!("Channel#{}", r.i64(0)) } else { r.text(1) },
                status: r.i64(2),
                channel_type: r.i64(3),
                balance: r.f64(4),
                used_quota: r.i64(5),
                response_time: r.i64(6),
                last_test: r.i64(7),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Per-user sequences and profiles
    // -----------------------------------------------------------------------

    /// Full per-row scan for one user, ordered by time. The risk analyzer
    /// needs the sequence, not an aggregate.
    pub async fn user_logs_in_window(
        &self,
        user_id: i64,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<LogRow>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT id, created_at, type, token_id, COALESCE(model_name, ''),
                   COALESCE({group_col}, ''), COALESCE(ip, ''), quota,
                   prompt_tokens, completion_tokens, use_time
            FROM logs
            WHERE user_id = ? AND created_at >= ? AND created_at < ?
            ORDER BY created_at ASC, id ASC
            "#,
            group_col = d.group_col(),
        );
        let rows = self
            .query(&sql, vec![user_id.into(), start.into(), end.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| LogRow {
                id: r.i64(0),
                created_at: r.i64(1),
                log_type: r.i64(2),
                user_id,
                token_id: r.i64(3),
                model_name: r.text(4),
                group: r.text(5),
                ip: r.text(6),
                quota: r.i64(7),
                prompt_tokens: r.i64(8),
                completion_tokens: r.i64(9),
                use_time_ms: r.i64(10),
            })
            .collect())
    }

    pub async fn user_row(&self, user_id: i64) -> StoreResult<Option<GatewayUser>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT id, username, COALESCE(display_name, ''), COALESCE(email, ''),
                   COALESCE({group_col}, 'default'), COALESCE(role, 1), COALESCE(status, 1),
                   github_id, wechat_id, telegram_id, discord_id, oidc_id, linux_do_id,
                   inviter_id
            FROM users
            WHERE id = ? AND deleted_at IS NULL
            "#,
            group_col = d.group_col(),
        );
        let rows = self.query(&sql, vec![user_id.into()]).await?;
        Ok(rows.into_iter().next().map(row_to_user))
    }

    pub async fn users_by_ids(&self, ids: &[i64]) -> StoreResult<Vec<GatewayUser>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT id, username, COALESCE(display_name, ''), COALESCE(email, ''),
                   COALESCE({group_col}, 'default'), COALESCE(role, 1), COALESCE(status, 1),
                   github_id, wechat_id, telegram_id, discord_id, oidc_id, linux_do_id,
                   inviter_id
            FROM users
            WHERE id IN ({list}) AND deleted_at IS NULL
            "#,
            group_col = d.group_col(),
            list = GatewayDialect::placeholder_list(ids.len()),
        );
        let params = ids.iter().map(|id| SqlParam::from(*id)).collect();
        let rows = self.query(&sql, params).await?;
        Ok(rows.into_iter().map(row_to_user).collect())
    }

    pub async fn admin_user_ids(&self) -> StoreResult<Vec<i64>> {
        let rows = self
            .query("SELECT id FROM users WHERE role >= 10 AND deleted_at IS NULL", vec![])
            .await?;
        Ok(rows.into_iter().map(|r| r.i64(0)).collect())
    }

    /// Distinct IPs one user was seen from, busiest first.
    pub async fn user_ips(
        &self,
        user_id: i64,
        start: i64,
        end: i64,
        limit: i64,
    ) -> StoreResult<Vec<UserIpUsage>> {
        let sql = r#"
            SELECT ip, COUNT(*) AS request_count, MIN(created_at) AS first_seen,
                   MAX(created_at) AS last_seen
            FROM logs
            WHERE created_at >= ? AND created_at < ? AND user_id = ?
              AND ip IS NOT NULL AND ip <> ''
            GROUP BY ip
            ORDER BY request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), user_id.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| UserIpUsage {
                ip: r.text(0),
                request_count: r.i64(1),
                first_seen: r.i64(2),
                last_seen: r.i64(3),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Leaderboards
    // -----------------------------------------------------------------------

    pub async fn leaderboard(
        &self,
        start: i64,
        end: i64,
        sort_by: LeaderboardSort,
        limit: i64,
    ) -> StoreResult<Vec<LeaderboardEntryRow>> {
        let d = self.dialect();
        let success = d.sum_i64("CASE WHEN l.type = 2 THEN 1 ELSE 0 END");
        let failure = d.sum_i64("CASE WHEN l.type = 5 THEN 1 ELSE 0 END");
        let order = match sort_by {
            LeaderboardSort::Requests => "request_count DESC, quota_used DESC".to_string(),
            LeaderboardSort::Quota => "quota_used DESC, request_count DESC".to_string(),
            LeaderboardSort::FailureRate => format!(
                "{failure} * 1.0 / COUNT(*) DESC, request_count DESC",
                failure = failure
            ),
        };
        let sql = format!(
            r#"
            SELECT l.user_id,
                   COALESCE(MAX(u.username), {fallback}) AS username,
                   COUNT(*) AS request_count,
                   {success} AS success_count,
                   {failure} AS failure_count,
                   {quota} AS quota_used,
                   COUNT(DISTINCT NULLIF(l.ip, '')) AS unique_ips,
                   COUNT(DISTINCT l.token_id) AS unique_tokens,
                   COUNT(DISTINCT l.model_name) AS unique_models
            FROM logs l
            LEFT JOIN users u ON u.id = l.user_id
            WHERE l.created_at >= ? AND l.created_at < ?
              AND l.type IN (2, 5)
              AND l.user_id IS NOT NULL
            GROUP BY l.user_id
            ORDER BY {order}
            LIMIT ?
            "#,
            fallback = d.username_fallback("l.user_id"),
            success = success,
            failure = failure,
            quota = d.sum_i64("l.quota"),
            order = order,
        );
        let rows = self
            .query(&sql, vec![start.into(), end.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| LeaderboardEntryRow {
                user_id: r.i64(0),
                username: r.text(1),
                request_count: r.i64(2),
                success_count: r.i64(3),
                failure_count: r.i64(4),
                quota_used: r.i64(5),
                unique_ips: r.i64(6),
                unique_tokens: r.i64(7),
                unique_models: r.i64(8),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Detector phase-1 candidates + phase-2 batched detail
    // -----------------------------------------------------------------------

    pub async fn shared_ips(
        &self,
        start: i64,
        end: i64,
        min_tokens: i64,
        limit: i64,
    ) -> StoreResult<Vec<SharedIp>> {
        let sql = r#"
            SELECT ip, COUNT(DISTINCT token_id) AS token_count,
                   COUNT(DISTINCT user_id) AS user_count, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IS NOT NULL AND ip <> ''
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY ip
            HAVING COUNT(DISTINCT token_id) >= ?
            ORDER BY token_count DESC, request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_tokens.into(), limit.into()])
            .await?;
        let mut items: Vec<SharedIp> = rows
            .into_iter()
            .map(|r| SharedIp {
                ip: r.text(0),
                token_count: r.i64(1),
                user_count: r.i64(2),
                request_count: r.i64(3),
                tokens: Vec::new(),
            })
            .collect();

        let ips: Vec<String> = items.iter().map(|i| i.ip.clone()).collect();
        let detail = self.shared_ip_details(&ips, start, end).await?;
        for item in &mut items {
            if let Some(tokens) = detail.get(&item.ip) {
                item.tokens = tokens.clone();
            }
        }
        Ok(items)
    }

    /// Phase 2 for shared IPs: top tokens per candidate IP, one batched query.
    pub async fn shared_ip_details(
        &self,
        ips: &[String],
        start: i64,
        end: i64,
    ) -> StoreResult<HashMap<String, Vec<SharedIpToken>>> {
        if ips.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            r#"
            SELECT ip, token_id, COALESCE(MAX(token_name), '') AS token_name,
                   user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IN ({list})
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY ip, token_id, user_id
            ORDER BY ip, request_count DESC
            "#,
            list = GatewayDialect::placeholder_list(ips.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(ips.iter().map(SqlParam::from));
        let rows = self.query(&sql, params).await?;

        let mut map: HashMap<String, Vec<SharedIpToken>> = HashMap::new();
        for r in rows {
            let entry = map.entry(r.text(0)).or_default();
            if entry.len() < 10 {
                entry.push(SharedIpToken {
                    token_id: r.i64(1),
                    token_name: r.text(2),
                    user_id: r.i64(3),
                    username: r.text(4),
                    request_count: r.i64(5),
                });
            }
        }
        Ok(map)
    }

    pub async fn multi_ip_tokens(
        &self,
        start: i64,
        end: i64,
        min_ips: i64,
        limit: i64,
    ) -> StoreResult<Vec<MultiIpToken>> {
        let sql = r#"
            SELECT token_id, COALESCE(MAX(token_name), '') AS token_name,
                   MAX(user_id) AS user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(DISTINCT NULLIF(ip, '')) AS ip_count,
                   COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY token_id
            HAVING COUNT(DISTINCT NULLIF(ip, '')) >= ?
            ORDER BY ip_count DESC, request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_ips.into(), limit.into()])
            .await?;
        let mut items: Vec<MultiIpToken> = rows
            .into_iter()
            .map(|r| MultiIpToken {
                token_id: r.i64(0),
                token_name: r.text(1),
                user_id: r.i64(2),
                username: r.text(3),
                ip_count: r.i64(4),
                request_count: r.i64(5),
                ips: Vec::new(),
            })
            .collect();

        let token_ids: Vec<i64> = items.iter().map(|i| i.token_id).collect();
        let detail = self.token_ip_details(&token_ids, start, end).await?;
        for item in &mut items {
            if let Some(ips) = detail.get(&item.token_id) {
                item.ips = ips.clone();
            }
        }
        Ok(items)
    }

    pub async fn token_ip_details(
        &self,
        token_ids: &[i64],
        start: i64,
        end: i64,
    ) -> StoreResult<HashMap<i64, Vec<IpRequestCount>>> {
        if token_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            r#"
            SELECT token_id, ip, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND token_id IN ({list})
              AND ip IS NOT NULL AND ip <> ''
            GROUP BY token_id, ip
            ORDER BY token_id, request_count DESC
            "#,
            list = GatewayDialect::placeholder_list(token_ids.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(token_ids.iter().map(|id| SqlParam::from(*id)));
        let rows = self.query(&sql, params).await?;

        let mut map: HashMap<i64, Vec<IpRequestCount>> = HashMap::new();
        for r in rows {
            let entry = map.entry(r.i64(0)).or_default();
            if entry.len() < 10 {
                entry.push(IpRequestCount { ip: r.text(1), request_count: r.i64(2) });
            }
        }
        Ok(map)
    }

    pub async fn multi_ip_users(
        &self,
        start: i64,
        end: i64,
        min_ips: i64,
        limit: i64,
    ) -> StoreResult<Vec<MultiIpUser>> {
        let sql = r#"
            SELECT user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(DISTINCT NULLIF(ip, '')) AS ip_count,
                   COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND user_id IS NOT NULL
            GROUP BY user_id
            HAVING COUNT(DISTINCT NULLIF(ip, '')) >= ?
            ORDER BY ip_count DESC, request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_ips.into(), limit.into()])
            .await?;
        let mut items: Vec<MultiIpUser> = rows
            .into_iter()
            .map(|r| MultiIpUser {
                user_id: r.i64(0),
                username: r.text(1),
                ip_count: r.i64(2),
                request_count: r.i64(3),
                top_ips: Vec::new(),
            })
            .collect();

        let user_ids: Vec<i64> = items.iter().map(|i| i.user_id).collect();
        let detail = self.user_ip_details(&user_ids, start, end).await?;
        for item in &mut items {
            if let Some(ips) = detail.get(&item.user_id) {
                item.top_ips = ips.clone();
            }
        }
        Ok(items)
    }

    pub async fn user_ip_details(
        &self,
        user_ids: &[i64],
        start: i64,
        end: i64,
    ) -> StoreResult<HashMap<i64, Vec<IpRequestCount>>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            r#"
            SELECT user_id, ip, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND user_id IN ({list})
              AND ip IS NOT NULL AND ip <> ''
            GROUP BY user_id, ip
            ORDER BY user_id, request_count DESC
            "#,
            list = GatewayDialect::placeholder_list(user_ids.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(user_ids.iter().map(|id| SqlParam::from(*id)));
        let rows = self.query(&sql, params).await?;

        let mut map: HashMap<i64, Vec<IpRequestCount>> = HashMap::new();
        for r in rows {
            let entry = map.entry(r.i64(0)).or_default();
            if entry.len() < 10 {
                entry.push(IpRequestCount { ip: r.text(1), request_count: r.i64(2) });
            }
        }
        Ok(map)
    }

    pub async fn token_rotation(
        &self,
        start: i64,
        end: i64,
        min_tokens: i64,
        max_per_token: f64,
        limit: i64,
    ) -> StoreResult<Vec<TokenRotationUser>> {
        let sql = r#"
            SELECT user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(DISTINCT token_id) AS token_count, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND user_id IS NOT NULL
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY user_id
            HAVING COUNT(DISTINCT token_id) >= ?
               AND COUNT(*) * 1.0 / COUNT(DISTINCT token_id) <= ?
            ORDER BY token_count DESC, request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(
                sql,
                vec![
                    start.into(),
                    end.into(),
                    min_tokens.into(),
                    max_per_token.into(),
                    limit.into(),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let token_count = r.i64(2).max(1);
                let request_count = r.i64(3);
                TokenRotationUser {
                    user_id: r.i64(0),
                    username: r.text(1),
                    token_count: r.i64(2),
                    request_count,
                    avg_requests_per_token: (request_count as f64 / token_count as f64 * 100.0)
                        .round()
                        / 100.0,
                }
            })
            .collect())
    }

    pub async fn affiliated_inviters(
        &self,
        min_invited: i64,
        limit: i64,
    ) -> StoreResult<Vec<(i64, i64)>> {
        let sql = r#"
            SELECT inviter_id, COUNT(*) AS invited_count
            FROM users
            WHERE inviter_id IS NOT NULL AND inviter_id > 0 AND deleted_at IS NULL
            GROUP BY inviter_id
            HAVING COUNT(*) >= ?
            ORDER BY invited_count DESC
            LIMIT ?
        "#;
        let rows = self.query(sql, vec![min_invited.into(), limit.into()]).await?;
        Ok(rows.into_iter().map(|r| (r.i64(0), r.i64(1))).collect())
    }

    pub async fn invited_users(
        &self,
        inviter_ids: &[i64],
    ) -> StoreResult<HashMap<i64, Vec<(i64, String, i64)>>> {
        if inviter_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            r#"
            SELECT inviter_id, id, username, COALESCE(status, 1)
            FROM users
            WHERE inviter_id IN ({list}) AND deleted_at IS NULL
            ORDER BY inviter_id, id ASC
            "#,
            list = GatewayDialect::placeholder_list(inviter_ids.len()),
        );
        let params = inviter_ids.iter().map(|id| SqlParam::from(*id)).collect();
        let rows = self.query(&sql, params).await?;
        let mut map: HashMap<i64, Vec<(i64, String, i64)>> = HashMap::new();
        for r in rows {
            map.entry(r.i64(0)).or_default().push((r.i64(1), r.text(2), r.i64(3)));
        }
        Ok(map)
    }

    /// Successful request counts for a set of users in the window; one query.
    pub async fn user_request_counts(
        &self,
        user_ids: &[i64],
        start: i64,
        end: i64,
    ) -> StoreResult<HashMap<i64, i64>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            r#"
            SELECT user_id, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND type = 2
              AND user_id IN ({list})
            GROUP BY user_id
            "#,
            list = GatewayDialect::placeholder_list(user_ids.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(user_ids.iter().map(|id| SqlParam::from(*id)));
        let rows = self.query(&sql, params).await?;
        Ok(rows.into_iter().map(|r| (r.i64(0), r.i64(1))).collect())
    }

    /// First-request IPs shared by several users in the window. The first
    /// request is identified by MIN(id); log ids are monotonic.
    pub async fn same_ip_registrations(
        &self,
        start: i64,
        end: i64,
        min_users: i64,
        limit: i64,
    ) -> StoreResult<Vec<SameIpRegistration>> {
        let sql = r#"
            SELECT l.ip, COUNT(DISTINCT f.user_id) AS user_count
            FROM (
                SELECT user_id, MIN(id) AS first_id
                FROM logs
                WHERE created_at >= ? AND created_at < ?
                  AND user_id IS NOT NULL
                  AND ip IS NOT NULL AND ip <> ''
                GROUP BY user_id
            ) f
            INNER JOIN logs l ON l.id = f.first_id
            GROUP BY l.ip
            HAVING COUNT(DISTINCT f.user_id) >= ?
            ORDER BY user_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_users.into(), limit.into()])
            .await?;
        let mut items: Vec<SameIpRegistration> = rows
            .into_iter()
            .map(|r| SameIpRegistration { ip: r.text(0), user_count: r.i64(1), users: Vec::new() })
            .collect();

        let ips: Vec<String> = items.iter().map(|i| i.ip.clone()).collect();
        if !ips.is_empty() {
            let detail_sql = format!(
                r#"
                SELECT l.ip, l.user_id, COALESCE(l.username, '') AS username,
                       l.created_at AS first_seen
                FROM (
                    SELECT user_id, MIN(id) AS first_id
                    FROM logs
                    WHERE created_at >= ? AND created_at < ?
                      AND user_id IS NOT NULL
                      AND ip IS NOT NULL AND ip <> ''
                    GROUP BY user_id
                ) f
                INNER JOIN logs l ON l.id = f.first_id
                WHERE l.ip IN ({list})
                ORDER BY l.ip, first_seen ASC
                "#,
                list = GatewayDialect::placeholder_list(ips.len()),
            );
            let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
            params.extend(ips.iter().map(SqlParam::from));
            let detail_rows = self.query(&detail_sql, params).await?;

            let mut map: HashMap<String, Vec<RegisteredUser>> = HashMap::new();
            for r in detail_rows {
                let entry = map.entry(r.text(0)).or_default();
                if entry.len() < 20 {
                    entry.push(RegisteredUser {
                        user_id: r.i64(1),
                        username: r.text(2),
                        first_seen: r.i64(3),
                    });
                }
            }
            for item in &mut items {
                if let Some(users) = map.remove(&item.ip) {
                    item.users = users;
                }
            }
        }
        Ok(items)
    }

    // -----------------------------------------------------------------------
    // Incremental slot queries (one slot, candidates capped at 500)
    // -----------------------------------------------------------------------

    pub async fn shared_ips_slot(
        &self,
        start: i64,
        end: i64,
        min_tokens: i64,
    ) -> StoreResult<Vec<SharedIpSlotEntry>> {
        let sql = r#"
            SELECT ip, COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IS NOT NULL AND ip <> ''
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY ip
            HAVING COUNT(DISTINCT token_id) >= ?
            ORDER BY COUNT(DISTINCT token_id) DESC
            LIMIT 500
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_tokens.into()])
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ips: Vec<String> = rows.iter().map(|r| r.text(0)).collect();
        let detail_sql = format!(
            r#"
            SELECT ip, token_id, user_id
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IN ({list})
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY ip, token_id, user_id
            "#,
            list = GatewayDialect::placeholder_list(ips.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(ips.iter().map(SqlParam::from));
        let detail_rows = self.query(&detail_sql, params).await?;

        let mut sets: HashMap<String, (Vec<i64>, Vec<i64>)> = HashMap::new();
        for r in detail_rows {
            let entry = sets.entry(r.text(0)).or_default();
            let token_id = r.i64(1);
            let user_id = r.i64(2);
            if token_id > 0 && !entry.0.contains(&token_id) {
                entry.0.push(token_id);
            }
            if user_id > 0 && !entry.1.contains(&user_id) {
                entry.1.push(user_id);
            }
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let ip = r.text(0);
                let (token_ids, user_ids) = sets.remove(&ip).unwrap_or_default();
                SharedIpSlotEntry { ip, request_count: r.i64(1), token_ids, user_ids }
            })
            .collect())
    }

    pub async fn multi_ip_tokens_slot(
        &self,
        start: i64,
        end: i64,
        min_ips: i64,
    ) -> StoreResult<Vec<MultiIpTokenSlotEntry>> {
        let sql = r#"
            SELECT token_id, COALESCE(MAX(token_name), '') AS token_name,
                   MAX(user_id) AS user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND token_id IS NOT NULL AND token_id > 0
            GROUP BY token_id
            HAVING COUNT(DISTINCT NULLIF(ip, '')) >= ?
            ORDER BY COUNT(DISTINCT NULLIF(ip, '')) DESC
            LIMIT 500
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_ips.into()])
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let token_ids: Vec<i64> = rows.iter().map(|r| r.i64(0)).collect();
        let ip_sql = format!(
            r#"
            SELECT DISTINCT token_id, ip
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND token_id IN ({list})
              AND ip IS NOT NULL AND ip <> ''
            "#,
            list = GatewayDialect::placeholder_list(token_ids.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(token_ids.iter().map(|id| SqlParam::from(*id)));
        let ip_rows = self.query(&ip_sql, params).await?;

        let mut ip_map: HashMap<i64, Vec<String>> = HashMap::new();
        for r in ip_rows {
            ip_map.entry(r.i64(0)).or_default().push(r.text(1));
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let token_id = r.i64(0);
                MultiIpTokenSlotEntry {
                    token_id,
                    token_name: r.text(1),
                    user_id: r.i64(2),
                    username: r.text(3),
                    request_count: r.i64(4),
                    ips: ip_map.remove(&token_id).unwrap_or_default(),
                }
            })
            .collect())
    }

    pub async fn multi_ip_users_slot(
        &self,
        start: i64,
        end: i64,
        min_ips: i64,
    ) -> StoreResult<Vec<MultiIpUserSlotEntry>> {
        let sql = r#"
            SELECT user_id, COALESCE(MAX(username), '') AS username,
                   COUNT(*) AS request_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND user_id IS NOT NULL
            GROUP BY user_id
            HAVING COUNT(DISTINCT NULLIF(ip, '')) >= ?
            ORDER BY COUNT(DISTINCT NULLIF(ip, '')) DESC
            LIMIT 500
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), min_ips.into()])
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<i64> = rows.iter().map(|r| r.i64(0)).collect();
        let ip_sql = format!(
            r#"
            SELECT DISTINCT user_id, ip
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND user_id IN ({list})
              AND ip IS NOT NULL AND ip <> ''
            "#,
            list = GatewayDialect::placeholder_list(user_ids.len()),
        );
        let mut params: Vec<SqlParam> = vec![start.into(), end.into()];
        params.extend(user_ids.iter().map(|id| SqlParam::from(*id)));
        let ip_rows = self.query(&ip_sql, params).await?;

        let mut ip_map: HashMap<i64, Vec<String>> = HashMap::new();
        for r in ip_rows {
            ip_map.entry(r.i64(0)).or_default().push(r.text(1));
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let user_id = r.i64(0);
                MultiIpUserSlotEntry {
                    user_id,
                    username: r.text(1),
                    request_count: r.i64(2),
                    ips: ip_map.remove(&user_id).unwrap_or_default(),
                }
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Model status buckets
    // -----------------------------------------------------------------------

    /// Batched heat-map aggregate: one query buckets every requested model
    /// into `floor((created_at - window_start) / slot_seconds)`.
    pub async fn model_status_buckets(
        &self,
        models: &[String],
        window_start: i64,
        slot_seconds: i64,
        end: i64,
    ) -> StoreResult<Vec<ModelSlotCount>> {
        if models.is_empty() {
            return Ok(Vec::new());
        }
        let d = self.dialect();
        let slot_expr = d.floor_div("(created_at - ?)", "?");
        let sql = format!(
            r#"
            SELECT model_name, {slot_expr} AS slot_idx, COUNT(*) AS total,
                   {success} AS success
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND type IN (2, 5)
              AND model_name IN ({list})
            GROUP BY model_name, slot_idx
            "#,
            slot_expr = slot_expr,
            success = d.sum_i64("CASE WHEN type = 2 THEN 1 ELSE 0 END"),
            list = GatewayDialect::placeholder_list(models.len()),
        );
        let mut params: Vec<SqlParam> = vec![
            window_start.into(),
            slot_seconds.into(),
            window_start.into(),
            end.into(),
        ];
        params.extend(models.iter().map(SqlParam::from));
        let rows = self.query(&sql, params).await?;
        Ok(rows
            .into_iter()
            .map(|r| ModelSlotCount {
                model_name: r.text(0),
                slot_idx: r.i64(1),
                total: r.i64(2),
                success: r.i64(3),
            })
            .collect())
    }

    /// Models seen in the log table recently (for status monitoring and the
    /// exclusion config UI).
    pub async fn recent_models(&self, start: i64, limit: i64) -> StoreResult<Vec<(String, i64)>> {
        let sql = r#"
            SELECT COALESCE(model_name, 'unknown') AS model_name, COUNT(*) AS requests
            FROM logs
            WHERE created_at >= ? AND type IN (2, 5)
            GROUP BY COALESCE(model_name, 'unknown')
            ORDER BY requests DESC
            LIMIT ?
        "#;
        let rows = self.query(sql, vec![start.into(), limit.into()]).await?;
        Ok(rows.into_iter().map(|r| (r.text(0), r.i64(1))).collect())
    }

    /// Groups seen in the log table recently.
    pub async fn recent_groups(&self, start: i64, limit: i64) -> StoreResult<Vec<(String, i64)>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT COALESCE({group_col}, 'default') AS group_name, COUNT(*) AS requests
            FROM logs
            WHERE created_at >= ? AND type IN (2, 5)
            GROUP BY COALESCE({group_col}, 'default')
            ORDER BY requests DESC
            LIMIT ?
            "#,
            group_col = d.group_col(),
        );
        let rows = self.query(&sql, vec![start.into(), limit.into()]).await?;
        Ok(rows.into_iter().map(|r| (r.text(0), r.i64(1))).collect())
    }

    // -----------------------------------------------------------------------
    // IP surfaces
    // -----------------------------------------------------------------------

    pub async fn ip_traffic(&self, start: i64, end: i64, limit: i64) -> StoreResult<Vec<IpTrafficRow>> {
        let sql = r#"
            SELECT ip, COUNT(*) AS request_count, COUNT(DISTINCT user_id) AS user_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IS NOT NULL AND ip <> ''
            GROUP BY ip
            ORDER BY request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| IpTrafficRow { ip: r.text(0), request_count: r.i64(1), user_count: r.i64(2) })
            .collect())
    }

    /// Reverse lookup: who used this IP, per (user, token) pair.
    pub async fn ip_users(
        &self,
        ip: &str,
        start: i64,
        end: i64,
        limit: i64,
    ) -> StoreResult<Vec<IpUserUsage>> {
        let sql = r#"
            SELECT user_id, COALESCE(MAX(username), '') AS username,
                   token_id, COALESCE(MAX(token_name), '') AS token_name,
                   COUNT(*) AS request_count,
                   MIN(created_at) AS first_seen, MAX(created_at) AS last_seen
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip = ?
              AND user_id IS NOT NULL
            GROUP BY user_id, token_id
            ORDER BY request_count DESC
            LIMIT ?
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), ip.into(), limit.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| IpUserUsage {
                user_id: r.i64(0),
                username: r.text(1),
                token_id: r.i64(2),
                token_name: r.text(3),
                request_count: r.i64(4),
                first_seen: r.i64(5),
                last_seen: r.i64(6),
            })
            .collect())
    }

    pub async fn ip_models(&self, ip: &str, start: i64, end: i64) -> StoreResult<Vec<ModelCount>> {
        let sql = r#"
            SELECT model_name, COUNT(*) AS usage_count
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip = ?
              AND model_name IS NOT NULL AND model_name <> ''
            GROUP BY model_name
            ORDER BY usage_count DESC
            LIMIT 10
        "#;
        let rows = self
            .query(sql, vec![start.into(), end.into(), ip.into()])
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ModelCount { model: r.text(0), count: r.i64(1) })
            .collect())
    }

    /// IP-recording adoption: total users vs users with
    /// `setting.record_ip_log = true`, via dialect JSON extraction.
    pub async fn ip_recording_stats(&self) -> StoreResult<(i64, i64)> {
        let d = self.dialect();
        let predicate = d.json_bool_is_true("setting", "record_ip_log");
        let sql = format!(
            r#"
            SELECT COUNT(*),
                   {enabled}
            FROM users
            WHERE deleted_at IS NULL
            "#,
            enabled = d.sum_i64(&format!(
                "CASE WHEN setting IS NOT NULL AND setting <> '' AND {} THEN 1 ELSE 0 END",
                predicate
            )),
        );
        let row = self.query_one(&sql, vec![]).await?;
        Ok((row.i64(0), row.i64(1)))
    }

    pub async fn unique_ips(&self, start: i64, end: i64) -> StoreResult<i64> {
        let sql = r#"
            SELECT COUNT(DISTINCT ip)
            FROM logs
            WHERE created_at >= ? AND created_at < ?
              AND ip IS NOT NULL AND ip <> ''
        "#;
        let row = self.query_one(sql, vec![start.into(), end.into()]).await?;
        Ok(row.i64(0))
    }

    // -----------------------------------------------------------------------
    // Auto-group support
    // -----------------------------------------------------------------------

    /// Active users still in the `default` group (or with no group at all),
    /// excluding the whitelist. Returns `(users, total)`.
    pub async fn pending_default_users(
        &self,
        whitelist: &[i64],
        page: i64,
        page_size: i64,
    ) -> StoreResult<(Vec<GatewayUser>, i64)> {
        let d = self.dialect();
        let group_col = d.group_col();
        let exclusion = if whitelist.is_empty() {
            String::new()
        } else {
            format!("AND id NOT IN ({})", GatewayDialect::placeholder_list(whitelist.len()))
        };

        let count_sql = format!(
            r#"
            SELECT COUNT(*)
            FROM users
            WHERE (COALESCE({group_col}, 'default') = 'default' OR {group_col} = '')
              AND deleted_at IS NULL
              AND status = 1
              {exclusion}
            "#,
            group_col = group_col,
            exclusion = exclusion,
        );
        let count_params: Vec<SqlParam> = whitelist.iter().map(|id| SqlParam::from(*id)).collect();
        let total = self.query_one(&count_sql, count_params).await?.i64(0);

        let offset = (page.max(1) - 1) * page_size;
        let list_sql = format!(
            r#"
            SELECT id, username, COALESCE(display_name, ''), COALESCE(email, ''),
                   COALESCE({group_col}, 'default'), COALESCE(role, 1), COALESCE(status, 1),
                   github_id, wechat_id, telegram_id, discord_id, oidc_id, linux_do_id,
                   inviter_id
            FROM users
            WHERE (COALESCE({group_col}, 'default') = 'default' OR {group_col} = '')
              AND deleted_at IS NULL
              AND status = 1
              {exclusion}
            ORDER BY id DESC
            LIMIT ? OFFSET ?
            "#,
            group_col = group_col,
            exclusion = exclusion,
        );
        let mut params: Vec<SqlParam> = whitelist.iter().map(|id| SqlParam::from(*id)).collect();
        params.push(page_size.into());
        params.push(offset.into());
        let rows = self.query(&list_sql, params).await?;
        Ok((rows.into_iter().map(row_to_user).collect(), total))
    }

    /// Groups currently assigned to non-deleted users.
    pub async fn user_groups_in_use(&self) -> StoreResult<Vec<(String, i64)>> {
        let d = self.dialect();
        let sql = format!(
            r#"
            SELECT COALESCE(NULLIF({group_col}, ''), 'default') AS group_name, COUNT(*) AS users
            FROM users
            WHERE deleted_at IS NULL
            GROUP BY COALESCE(NULLIF({group_col}, ''), 'default')
            ORDER BY users DESC
            "#,
            group_col = d.group_col(),
        );
        let rows = self.query(&sql, vec![]).await?;
        Ok(rows.into_iter().map(|r| (r.text(0), r.i64(1))).collect())
    }

    // -----------------------------------------------------------------------
    // Scale metrics
    // -----------------------------------------------------------------------

    /// `(total_users, logs_24h, total_logs)` for scale classification.
    pub async fn scale_metrics(&self, now: i64) -> StoreResult<(i64, i64, i64)> {
        let users = self.count_users_total().await?;
        let logs_24h = self
            .query_one(
                "SELECT COUNT(*) FROM logs WHERE created_at >= ?",
                vec![(now - 86400).into()],
            )
            .await?
            .i64(0);
        let total_logs = self.query_one("SELECT COUNT(*) FROM logs", vec![]).await?.i64(0);
        Ok((users, logs_24h, total_logs))
    }
}

/// Sort dimension for the risk leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSort {
    Requests,
    Quota,
    FailureRate,
}

impl LeaderboardSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requests" => Some(Self::Requests),
            "quota" => Some(Self::Quota),
            "failure_rate" => Some(Self::FailureRate),
            _ => None,
        }
    }
}

/// Raw leaderboard row before risk flags are attached.
#[derive(Debug, Clone)]
pub struct LeaderboardEntryRow {
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub quota_used: i64,
    pub unique_ips: i64,
    pub unique_tokens: i64,
    pub unique_models: i64,
}

fn row_to_user(r: SqlRow) -> GatewayUser {
    GatewayUser {
        id: r.i64(0),
        username: r.text(1),
        display_name: r.text(2),
        email: r.text(3),
        group: r.text(4),
        role: r.i64(5),
        status: r.i64(6),
        github_id: r.opt_text(7),
        wechat_id: r.opt_text(8),
        telegram_id: r.opt_text(9),
        discord_id: r.opt_text(10),
        oidc_id: r.opt_text(11),
        linux_do_id: r.opt_text(12),
        inviter_id: r.opt_i64(13),
    }
}
