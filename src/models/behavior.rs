//! Derived per-user behavior records produced by the risk engine and consumed
//! by both the dashboard and the AI adjudicator.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Discrete risk labels. Only the three IP-related flags drive AI candidate
/// selection; the set is closed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum RiskFlag {
    #[serde(rename = "MANY_IPS")]
    ManyIps,
    #[serde(rename = "IP_RAPID_SWITCH")]
    IpRapidSwitch,
    #[serde(rename = "IP_HOPPING")]
    IpHopping,
}

impl RiskFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManyIps => "MANY_IPS",
            Self::IpRapidSwitch => "IP_RAPID_SWITCH",
            Self::IpHopping => "IP_HOPPING",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BehaviorSummary {
    pub total_requests: i64,
    pub unique_models: i64,
    pub unique_tokens: i64,
    pub unique_ips: i64,
}

/// Result of walking a user's request sequence and classifying each IP
/// transition. Invariant: `switch_count = real_switch_count +
/// dual_stack_switches`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IpSwitchAnalysis {
    pub switch_count: i64,
    pub real_switch_count: i64,
    pub dual_stack_switches: i64,
    pub rapid_switch_count: i64,
    pub avg_ip_duration: f64,
    pub min_switch_interval: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopIp {
    pub ip: String,
    pub requests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopModel {
    pub model_name: String,
    pub requests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopGroup {
    pub group_name: String,
    pub requests: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BehaviorUser {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub group: String,
    pub role: i64,
    pub status: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RiskSection {
    pub risk_flags: Vec<RiskFlag>,
    pub ip_switch_analysis: IpSwitchAnalysis,
}

/// The full analysis record for one user over one window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserBehavior {
    pub user: BehaviorUser,
    pub window: String,
    pub end_time: i64,
    pub summary: BehaviorSummary,
    pub risk: RiskSection,
    pub top_ips: Vec<TopIp>,
    pub top_models: Vec<TopModel>,
    pub top_groups: Vec<TopGroup>,
    pub ips: Vec<crate::models::gateway::UserIpUsage>,
}

impl UserBehavior {
    pub fn has_ip_risk(&self) -> bool {
        !self.risk.risk_flags.is_empty()
    }
}

/// One row of a risk leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub request_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub failure_rate: f64,
    pub quota_used: i64,
    pub unique_ips: i64,
    pub unique_tokens: i64,
    pub unique_models: i64,
    pub risk_flags: Vec<RiskFlag>,
}
