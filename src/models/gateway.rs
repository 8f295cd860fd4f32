//! Typed row shapes for the gateway database.
//!
//! Only the columns the sidecar actually reads are modeled; the gateway owns
//! the schema and everything else in it is opaque to us.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One `logs` row, in the column subset used by the risk analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub id: i64,
    pub created_at: i64,
    pub log_type: i64,
    pub user_id: i64,
    pub token_id: i64,
    pub model_name: String,
    pub group: String,
    pub ip: String,
    pub quota: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub use_time_ms: i64,
}

/// One `users` row, in the column subset used for moderation decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayUser {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub group: String,
    pub role: i64,
    pub status: i64,
    pub github_id: Option<String>,
    pub wechat_id: Option<String>,
    pub telegram_id: Option<String>,
    pub discord_id: Option<String>,
    pub oidc_id: Option<String>,
    pub linux_do_id: Option<String>,
    pub inviter_id: Option<i64>,
}

/// How a user signed up, inferred from the first populated external-id field
/// (field order is significant and matches the gateway's login methods).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationSource {
    Github,
    Wechat,
    Telegram,
    Discord,
    Oidc,
    LinuxDo,
    Password,
}

impl RegistrationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Wechat => "wechat",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Oidc => "oidc",
            Self::LinuxDo => "linux_do",
            Self::Password => "password",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github" => Some(Self::Github),
            "wechat" => Some(Self::Wechat),
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "oidc" => Some(Self::Oidc),
            "linux_do" => Some(Self::LinuxDo),
            "password" => Some(Self::Password),
            _ => None,
        }
    }

    pub const ALL: &'static [RegistrationSource] = &[
        Self::Github,
        Self::Wechat,
        Self::Telegram,
        Self::Discord,
        Self::Oidc,
        Self::LinuxDo,
        Self::Password,
    ];

    pub fn detect(user: &GatewayUser) -> Self {
        let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if has(&user.github_id) {
            Self::Github
        } else if has(&user.wechat_id) {
            Self::Wechat
        } else if has(&user.telegram_id) {
            Self::Telegram
        } else if has(&user.discord_id) {
            Self::Discord
        } else if has(&user.oidc_id) {
            Self::Oidc
        } else if has(&user.linux_do_id) {
            Self::LinuxDo
        } else {
            Self::Password
        }
    }
}

// ---------------------------------------------------------------------------
// Dashboard aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UsageTotals {
    pub total_requests: i64,
    pub total_quota_used: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub average_response_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelUsage {
    pub model_name: String,
    pub request_count: i64,
    pub quota_used: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRanking {
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
    pub quota_used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailyTrend {
    pub date: String,
    pub request_count: i64,
    pub quota_used: i64,
    pub unique_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HourlyTrend {
    pub hour: String,
    pub timestamp: i64,
    pub request_count: i64,
    pub quota_used: i64,
    pub unique_users: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChannelStatus {
    pub id: i64,
    pub name: String,
    pub status: i64,
    #[serde(rename = "type")]
    pub channel_type: i64,
    pub balance: f64,
    pub used_quota: i64,
    pub response_time: i64,
    pub last_test: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SystemOverview {
    pub total_users: i64,
    pub active_users: i64,
    pub total_tokens: i64,
    pub active_tokens: i64,
    pub total_channels: i64,
    pub active_channels: i64,
    pub total_models: i64,
    pub total_redemptions: i64,
    pub unused_redemptions: i64,
    pub period: String,
}

// ---------------------------------------------------------------------------
// Detector outputs
// ---------------------------------------------------------------------------

/// Request count for one IP; the per-candidate detail unit of several
/// detectors.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpRequestCount {
    pub ip: String,
    pub request_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SharedIpToken {
    pub token_id: i64,
    pub token_name: String,
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SharedIp {
    pub ip: String,
    pub token_count: i64,
    pub user_count: i64,
    pub request_count: i64,
    pub tokens: Vec<SharedIpToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultiIpToken {
    pub token_id: i64,
    pub token_name: String,
    pub user_id: i64,
    pub username: String,
    pub ip_count: i64,
    pub request_count: i64,
    pub ips: Vec<IpRequestCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultiIpUser {
    pub user_id: i64,
    pub username: String,
    pub ip_count: i64,
    pub request_count: i64,
    pub top_ips: Vec<IpRequestCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenRotationUser {
    pub user_id: i64,
    pub username: String,
    pub token_count: i64,
    pub request_count: i64,
    pub avg_requests_per_token: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvitedUser {
    pub user_id: i64,
    pub username: String,
    pub status: i64,
    pub request_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AffiliatedInviter {
    pub inviter_id: i64,
    pub inviter_username: String,
    pub invited_count: i64,
    pub invited: Vec<InvitedUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisteredUser {
    pub user_id: i64,
    pub username: String,
    pub first_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SameIpRegistration {
    pub ip: String,
    pub user_count: i64,
    pub users: Vec<RegisteredUser>,
}

/// Detector response wrapper shared by all six detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorPage<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> DetectorPage<T> {
    pub fn new(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

// ---------------------------------------------------------------------------
// Incremental slot payloads (stored per finalized slot, merged across slots)
// ---------------------------------------------------------------------------

/// Shared-IP candidate inside one slot. Token/user id sets carry enough
/// identity to deduplicate across slots during the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedIpSlotEntry {
    pub ip: String,
    pub request_count: i64,
    pub token_ids: Vec<i64>,
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiIpTokenSlotEntry {
    pub token_id: i64,
    pub token_name: String,
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
    pub ips: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiIpUserSlotEntry {
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
    pub ips: Vec<String>,
}

// ---------------------------------------------------------------------------
// Model status buckets
// ---------------------------------------------------------------------------

/// One `(model, slot)` bucket out of the batched model-status aggregate.
#[derive(Debug, Clone)]
pub struct ModelSlotCount {
    pub model_name: String,
    pub slot_idx: i64,
    pub total: i64,
    pub success: i64,
}

// ---------------------------------------------------------------------------
// IP reverse lookup / per-user IP listings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpUserUsage {
    pub user_id: i64,
    pub username: String,
    pub token_id: i64,
    pub token_name: String,
    pub request_count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelCount {
    pub model: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserIpUsage {
    pub ip: String,
    pub request_count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// Raw per-IP traffic row feeding the geography distribution.
#[derive(Debug, Clone)]
pub struct IpTrafficRow {
    pub ip: String,
    pub request_count: i64,
    pub user_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with(github: Option<&str>, oidc: Option<&str>) -> GatewayUser {
        GatewayUser {
            id: 1,
            username: "u".into(),
            display_name: String::new(),
            email: String::new(),
            group: "default".into(),
            role: 1,
            status: 1,
            github_id: github.map(String::from),
            wechat_id: None,
            telegram_id: None,
            discord_id: None,
            oidc_id: oidc.map(String::from),
            linux_do_id: None,
            inviter_id: None,
        }
    }

    #[test]
    fn registration_source_follows_field_order() {
        assert_eq!(
            RegistrationSource::detect(&user_with(Some("gh"), Some("oidc"))),
            RegistrationSource::Github
        );
        assert_eq!(
            RegistrationSource::detect(&user_with(None, Some("oidc"))),
            RegistrationSource::Oidc
        );
        assert_eq!(RegistrationSource::detect(&user_with(None, None)), RegistrationSource::Password);
    }

    #[test]
    fn empty_external_id_is_not_a_source() {
        assert_eq!(RegistrationSource::detect(&user_with(Some(""), None)), RegistrationSource::Password);
    }

    #[test]
    fn source_round_trip() {
        for s in RegistrationSource::ALL {
            assert_eq!(RegistrationSource::parse(s.as_str()), Some(*s));
        }
    }
}
