//! Gateway SQL dialect differences.
//!
//! Both engines share identical query shapes; the deltas are confined to this
//! module: quoting of the reserved column name `group`, string concatenation,
//! JSON extraction from `users.setting`, boolean literals, aggregate casts
//! and the positional-placeholder style.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayDialect {
    MySql,
    Postgres,
}

impl GatewayDialect {
    pub fn parse(engine: &str) -> Option<Self> {
        match engine.to_ascii_lowercase().as_str() {
            "mysql" => Some(Self::MySql),
            "postgresql" | "postgres" | "pgsql" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// The quoted reserved column `users.group` / `logs.group`.
    pub fn group_col(&self) -> &'static str {
        match self {
            Self::MySql => "`group`",
            Self::Postgres => "\"group\"",
        }
    }

    /// String concatenation of the given SQL expressions.
    pub fn concat(&self, parts: &[&str]) -> String {
        match self {
            Self::MySql => format!("CONCAT({})", parts.join(", ")),
            Self::Postgres => parts.join(" || "),
        }
    }

    /// Fallback username rendered from the numeric user id.
    pub fn username_fallback(&self, user_id_expr: &str) -> String {
        match self {
            Self::MySql => self.concat(&["'User#'", user_id_expr]),
            Self::Postgres => {
                let cast = format!("{}::text", user_id_expr);
                self.concat(&["'User#'", &cast])
            }
        }
    }

    /// Predicate: JSON boolean key in a TEXT settings column is true.
    pub fn json_bool_is_true(&self, column: &str, key: &str) -> String {
        match self {
            Self::MySql => {
                format!("JSON_EXTRACT({}, '$.{}') = true", column, key)
            }
            Self::Postgres => {
                format!("{}::jsonb->>'{}' = 'true'", column, key)
            }
        }
    }

    /// UPDATE expression that sets a JSON boolean key to true, creating the
    /// object when the column is NULL or empty.
    pub fn json_set_bool_true(&self, column: &str, key: &str) -> String {
        match self {
            Self::MySql => format!(
                "JSON_SET(COALESCE(NULLIF({col}, ''), '{{}}'), '$.{key}', true)",
                col = column,
                key = key
            ),
            Self::Postgres => format!(
                "COALESCE(NULLIF({col}, '')::jsonb, '{{}}'::jsonb) || '{{\"{key}\": true}}'::jsonb",
                col = column,
                key = key
            ),
        }
    }

    /// `COALESCE(SUM(expr), 0)` forced to an integer column type on both
    /// engines (Postgres SUM(int) yields NUMERIC otherwise).
    pub fn sum_i64(&self, expr: &str) -> String {
        match self {
            Self::MySql => format!("COALESCE(SUM({}), 0)", expr),
            Self::Postgres => format!("COALESCE(SUM({}), 0)::bigint", expr),
        }
    }

    /// `COALESCE(AVG(expr), 0)` as a double on both engines.
    pub fn avg_f64(&self, expr: &str) -> String {
        match self {
            Self::MySql => format!("COALESCE(AVG({}), 0)", expr),
            Self::Postgres => format!("COALESCE(AVG({}), 0)::double precision", expr),
        }
    }

    /// Integer floor division of two non-negative SQL expressions. MySQL's
    /// `/` is decimal division and needs FLOOR; Postgres integer division
    /// already truncates (and would yield NUMERIC under FLOOR).
    pub fn floor_div(&self, numerator: &str, denominator: &str) -> String {
        match self {
            Self::MySql => format!("FLOOR({} / {})", numerator, denominator),
            Self::Postgres => format!("({} / {})", numerator, denominator),
        }
    }

    pub fn bool_true(&self) -> &'static str {
        match self {
            Self::MySql => "1",
            Self::Postgres => "TRUE",
        }
    }

    /// Rewrite `?` placeholders to `$1..$n` for Postgres. The MySQL driver
    /// consumes `?` natively. Question marks inside single-quoted literals
    /// are left alone.
    pub fn rewrite_placeholders(&self, sql: &str) -> String {
        match self {
            Self::MySql => sql.to_string(),
            Self::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut n = 0usize;
                let mut in_string = false;
                for ch in sql.chars() {
                    match ch {
                        '\'' => {
                            in_string = !in_string;
                            out.push(ch);
                        }
                        '?' if !in_string => {
                            n += 1;
                            out.push('$');
                            out.push_str(&n.to_string());
                        }
                        _ => out.push(ch),
                    }
                }
                out
            }
        }
    }

    /// A `(?, ?, ...)` list with `n` placeholders for IN clauses.
    pub fn placeholder_list(n: usize) -> String {
        let mut parts = Vec::with_capacity(n);
        for _ in 0..n {
            parts.push("?");
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_quoting_differs() {
        assert_eq!(GatewayDialect::MySql.group_col(), "`group`");
        assert_eq!(GatewayDialect::Postgres.group_col(), "\"group\"");
    }

    #[test]
    fn concat_forms() {
        assert_eq!(
            GatewayDialect::MySql.username_fallback("l.user_id"),
            "CONCAT('User#', l.user_id)"
        );
        assert_eq!(
            GatewayDialect::Postgres.username_fallback("l.user_id"),
            "'User#' || l.user_id::text"
        );
    }

    #[test]
    fn placeholder_rewrite() {
        let sql = "SELECT * FROM logs WHERE created_at >= ? AND ip <> '' AND user_id = ?";
        assert_eq!(GatewayDialect::MySql.rewrite_placeholders(sql), sql);
        assert_eq!(
            GatewayDialect::Postgres.rewrite_placeholders(sql),
            "SELECT * FROM logs WHERE created_at >= $1 AND ip <> '' AND user_id = $2"
        );
    }

    #[test]
    fn placeholder_rewrite_skips_string_literals() {
        let sql = "SELECT '?' FROM logs WHERE id = ?";
        assert_eq!(
            GatewayDialect::Postgres.rewrite_placeholders(sql),
            "SELECT '?' FROM logs WHERE id = $1"
        );
    }

    #[test]
    fn json_predicates() {
        assert_eq!(
            GatewayDialect::MySql.json_bool_is_true("setting", "record_ip_log"),
            "JSON_EXTRACT(setting, '$.record_ip_log') = true"
        );
        assert_eq!(
            GatewayDialect::Postgres.json_bool_is_true("setting", "record_ip_log"),
            "setting::jsonb->>'record_ip_log' = 'true'"
        );
    }

    #[test]
    fn in_list_placeholders() {
        assert_eq!(GatewayDialect::placeholder_list(3), "?, ?, ?");
    }

    #[test]
    fn floor_division() {
        assert_eq!(
            GatewayDialect::MySql.floor_div("created_at", "3600"),
            "FLOOR(created_at / 3600)"
        );
        assert_eq!(
            GatewayDialect::Postgres.floor_div("created_at", "3600"),
            "(created_at / 3600)"
        );
    }
}
