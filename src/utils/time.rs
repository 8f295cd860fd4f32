//! Time window vocabulary shared by dashboards, risk monitoring and the
//! model status heat-map.

use serde::{Deserialize, Serialize};

/// A named analysis window. Every public operation takes one of these rather
/// than a raw number of seconds, so the per-surface allow-lists below are the
/// single place that decides what a handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "3h")]
    H3,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "24h")]
    H24,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "7d")]
    D7,
    #[serde(rename = "14d")]
    D14,
}

impl Window {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Self::H1),
            "3h" => Some(Self::H3),
            "6h" => Some(Self::H6),
            "12h" => Some(Self::H12),
            "24h" => Some(Self::H24),
            "3d" => Some(Self::D3),
            "7d" => Some(Self::D7),
            "14d" => Some(Self::D14),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H1 => "1h",
            Self::H3 => "3h",
            Self::H6 => "6h",
            Self::H12 => "12h",
            Self::H24 => "24h",
            Self::D3 => "3d",
            Self::D7 => "7d",
            Self::D14 => "14d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::H1 => 3600,
            Self::H3 => 3 * 3600,
            Self::H6 => 6 * 3600,
            Self::H12 => 12 * 3600,
            Self::H24 => 24 * 3600,
            Self::D3 => 3 * 86400,
            Self::D7 => 7 * 86400,
            Self::D14 => 14 * 86400,
        }
    }

    /// Windows long enough that re-scanning them on every request is wasteful;
    /// these go through the slot cache.
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::D3 | Self::D7 | Self::D14)
    }
}

/// Windows accepted by dashboard endpoints.
pub const DASHBOARD_WINDOWS: &[Window] =
    &[Window::H1, Window::H6, Window::H24, Window::D3, Window::D7, Window::D14];

/// Windows accepted by risk leaderboards, user analysis and detectors.
pub const RISK_WINDOWS: &[Window] = &[
    Window::H1,
    Window::H3,
    Window::H6,
    Window::H12,
    Window::H24,
    Window::D3,
    Window::D7,
];

/// Windows accepted by the model status heat-map.
pub const MODEL_STATUS_WINDOWS: &[Window] =
    &[Window::H1, Window::H6, Window::H12, Window::H24];

/// Windows accepted by the IP distribution endpoint.
pub const IP_DIST_WINDOWS: &[Window] = &[Window::H1, Window::H6, Window::H24, Window::D7];

/// Parse a window name, validating it against the allow-list for one surface.
pub fn parse_window(s: &str, allowed: &[Window]) -> Option<Window> {
    Window::parse(s).filter(|w| allowed.contains(w))
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        for w in RISK_WINDOWS {
            assert_eq!(Window::parse(w.as_str()), Some(*w));
        }
        assert_eq!(Window::parse("2h"), None);
    }

    #[test]
    fn allow_list_is_enforced() {
        assert_eq!(parse_window("12h", MODEL_STATUS_WINDOWS), Some(Window::H12));
        assert_eq!(parse_window("12h", DASHBOARD_WINDOWS), None);
        assert_eq!(parse_window("14d", RISK_WINDOWS), None);
    }

    #[test]
    fn incremental_windows() {
        assert!(Window::D3.is_incremental());
        assert!(Window::D14.is_incremental());
        assert!(!Window::H24.is_incremental());
    }
}
