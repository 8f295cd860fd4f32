//! Assessment prompt templating.
//!
//! Templates use `{name}` placeholders from a closed set; `{{` and `}}`
//! escape literal braces (the default template embeds a JSON example).
//! Rendering fails closed: any unknown placeholder aborts the custom
//! template and the caller falls back to the default.

use std::collections::HashMap;

pub const SYSTEM_PROMPT: &str = "你是一个专业的 API 风控分析师，擅长识别异常用户行为。请只返回 JSON 格式的响应，不要包含任何其他文本。";

pub const DEFAULT_ASSESSMENT_PROMPT: &str = r#"你是一个 API 风控系统的 AI 助手。请分析以下用户的行为数据，判断是否存在滥用行为。

## 用户信息
- 用户ID: {user_id}
- 用户名: {username}
- 用户组: {user_group}

## 请求概况
- 请求总数: {total_requests}
- 使用模型数: {unique_models}
- 使用令牌数: {unique_tokens}

## IP 行为分析
- 使用 IP 数量: {unique_ips}
- IP 总切换次数: {switch_count}
- 真实切换次数（排除双栈）: {real_switch_count}
- 双栈切换次数（同位置 v4/v6）: {dual_stack_switches}
- 快速切换次数（60秒内，排除双栈）: {rapid_switch_count}
- 平均 IP 停留时间: {avg_ip_duration} 秒
- 最短切换间隔: {min_switch_interval} 秒
- 已触发风险标签: {risk_flags}
- 用户使用的 IP: {user_ips}
- 命中白名单的 IP: {user_whitelisted_ips}
- 命中黑名单的 IP: {user_blacklisted_ips}

## Token 使用分析
- 平均每 Token 请求数: {avg_requests_per_token}
- Token 轮换风险: {token_rotation_risk}

## 判断标准
1. **IP 切换异常**：几秒内频繁切换 IP 是明显异常（可能是多人共用账号）
2. **长停留时间豁免**：如果平均 IP 停留时间 >= 300秒（5分钟），即使有快速切换也可能是网络波动，应降低风险
3. **Token 轮换**：使用多个 Token 且每个 Token 请求很少，可能在规避限制
4. **双栈用户**：同一位置的 IPv4/IPv6 切换是正常行为，不应视为风险
5. 多项风险标签叠加时风险更高
6. 该用户已通过请求量门槛（>= 50次），属于活跃用户

注意：空回复率和失败率不作为判断依据，因为嵌入模型本身不返回文本内容。

## 请返回 JSON 格式（严格遵循）:
```json
{{
  "should_ban": true或false,
  "risk_score": 1到10的整数,
  "confidence": 0.0到1.0的小数,
  "reason": "封禁或放行理由（中文，100字以内）"
}}
```

注意：
- risk_score >= 8 且 confidence >= 0.8 时才会自动封禁
- 请谨慎判断，避免误封正常用户
- 双栈切换是正常行为，应降低风险评分
- 只返回 JSON，不要有其他内容"#;

/// The closed set of placeholder values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    pub user_id: i64,
    pub username: String,
    pub user_group: String,
    pub total_requests: i64,
    pub unique_models: i64,
    pub unique_tokens: i64,
    pub unique_ips: i64,
    pub switch_count: i64,
    pub real_switch_count: i64,
    pub dual_stack_switches: i64,
    pub rapid_switch_count: i64,
    pub avg_ip_duration: f64,
    pub min_switch_interval: i64,
    pub risk_flags: Vec<String>,
    pub avg_requests_per_token: f64,
    pub token_rotation_risk: String,
    pub whitelist_ips: Vec<String>,
    pub blacklist_ips: Vec<String>,
    pub user_whitelisted_ips: Vec<String>,
    pub user_blacklisted_ips: Vec<String>,
    pub user_ips: Vec<String>,
}

impl PromptVars {
    fn to_map(&self) -> HashMap<&'static str, String> {
        let list = |items: &[String]| {
            if items.is_empty() { "[]".to_string() } else { format!("[{}]", items.join(", ")) }
        };
        let mut map = HashMap::new();
        map.insert("user_id", self.user_id.to_string());
        map.insert("username", self.username.clone());
        map.insert(
            "user_group",
            if self.user_group.is_empty() { "默认".to_string() } else { self.user_group.clone() },
        );
        map.insert("total_requests", self.total_requests.to_string());
        map.insert("unique_models", self.unique_models.to_string());
        map.insert("unique_tokens", self.unique_tokens.to_string());
        map.insert("unique_ips", self.unique_ips.to_string());
        map.insert("switch_count", self.switch_count.to_string());
        map.insert("real_switch_count", self.real_switch_count.to_string());
        map.insert("dual_stack_switches", self.dual_stack_switches.to_string());
        map.insert("rapid_switch_count", self.rapid_switch_count.to_string());
        map.insert("avg_ip_duration", self.avg_ip_duration.to_string());
        map.insert("min_switch_interval", self.min_switch_interval.to_string());
        map.insert("risk_flags", list(&self.risk_flags));
        map.insert("avg_requests_per_token", self.avg_requests_per_token.to_string());
        map.insert("token_rotation_risk", self.token_rotation_risk.clone());
        map.insert("whitelist_ips", list(&self.whitelist_ips));
        map.insert("blacklist_ips", list(&self.blacklist_ips));
        map.insert("user_whitelisted_ips", list(&self.user_whitelisted_ips));
        map.insert("user_blacklisted_ips", list(&self.user_blacklisted_ips));
        map.insert("user_ips", list(&self.user_ips));
        map
    }
}

/// Token-rotation label shown to the adjudicator.
pub fn token_rotation_risk(unique_tokens: i64, avg_requests_per_token: f64) -> &'static str {
    if unique_tokens >= 5 && avg_requests_per_token <= 10.0 {
        "高（多Token轮换，每Token请求少）"
    } else if unique_tokens >= 3 && avg_requests_per_token <= 20.0 {
        "中"
    } else {
        "低"
    }
}

/// Render a template against the closed placeholder set. Returns `None` on
/// any unknown placeholder or unbalanced brace.
pub fn render(template: &str, vars: &PromptVars) -> Option<String> {
    let map = vars.to_map();
    let mut out = String::with_capacity(template.len() + 64);
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_alphanumeric() || c == '_' => key.push(c),
                        _ => return None,
                    }
                }
                out.push_str(map.get(key.as_str())?);
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push('}');
            }
            _ => out.push(ch),
        }
    }
    Some(out)
}

/// Render the custom template when one is configured and valid, otherwise
/// the default.
pub fn render_with_fallback(custom: &str, vars: &PromptVars) -> String {
    let custom = custom.trim();
    if !custom.is_empty() {
        if let Some(rendered) = render(custom, vars) {
            return rendered;
        }
        tracing::warn!("custom assessment prompt failed to render; using the default template");
    }
    render(DEFAULT_ASSESSMENT_PROMPT, vars)
        .expect("default template renders against the closed placeholder set")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> PromptVars {
        PromptVars {
            user_id: 42,
            username: "mallory".to_string(),
            user_group: "default".to_string(),
            total_requests: 200,
            unique_ips: 12,
            risk_flags: vec!["IP_RAPID_SWITCH".to_string()],
            token_rotation_risk: "低".to_string(),
            user_ips: vec!["1.2.3.4".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn default_template_renders() {
        let rendered = render(DEFAULT_ASSESSMENT_PROMPT, &vars()).unwrap();
        assert!(rendered.contains("用户ID: 42"));
        assert!(rendered.contains("mallory"));
        assert!(rendered.contains("[IP_RAPID_SWITCH]"));
        // Escaped braces of the JSON example survive as literals.
        assert!(rendered.contains("\"should_ban\": true或false"));
        assert!(!rendered.contains("{user_id}"));
    }

    #[test]
    fn unknown_placeholder_fails_closed() {
        assert!(render("value: {definitely_not_a_var}", &vars()).is_none());
        assert!(render("broken {user_id", &vars()).is_none());
    }

    #[test]
    fn fallback_uses_default_on_bad_custom_template() {
        let rendered = render_with_fallback("hello {nope}", &vars());
        assert!(rendered.contains("用户ID: 42"));

        let custom = render_with_fallback("user {user_id} only", &vars());
        assert_eq!(custom, "user 42 only");
    }

    #[test]
    fn rotation_risk_labels() {
        assert_eq!(token_rotation_risk(5, 10.0), "高（多Token轮换，每Token请求少）");
        assert_eq!(token_rotation_risk(3, 20.0), "中");
        assert_eq!(token_rotation_risk(2, 5.0), "低");
        assert_eq!(token_rotation_risk(10, 100.0), "低");
    }
}
