//! Scale-dependent cache TTL policy.
//!
//! Long windows change slowly and are dominated by finalized slots, so their
//! generic-namespace TTL can be generous; short windows stay fresh. Larger
//! deployments get longer TTLs across the board to shield the gateway
//! database.

use crate::utils::Window;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemScale {
    Tiny,
    Small,
    Medium,
    Large,
    XLarge,
}

impl SystemScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::XLarge => "xlarge",
        }
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Tiny,
            1 => Self::Small,
            2 => Self::Medium,
            4 => Self::XLarge,
            3 => Self::Large,
            _ => Self::Medium,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Tiny => 0,
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 3,
            Self::XLarge => 4,
        }
    }

    /// Classify the deployment from `(total_users, logs_24h, total_logs)`.
    pub fn classify(total_users: i64, logs_24h: i64, total_logs: i64) -> Self {
        if total_users >= 50_000 || logs_24h >= 5_000_000 || total_logs >= 100_000_000 {
            Self::XLarge
        } else if total_users >= 10_000 || logs_24h >= 1_000_000 || total_logs >= 20_000_000 {
            Self::Large
        } else if total_users >= 2_000 || logs_24h >= 200_000 || total_logs >= 2_000_000 {
            Self::Medium
        } else if total_users >= 200 || logs_24h >= 20_000 || total_logs >= 200_000 {
            Self::Small
        } else {
            Self::Tiny
        }
    }
}

/// Generic-namespace TTL (seconds) for one dashboard window.
/// `(small, medium, large, xlarge)` per window; tiny deployments fall back to
/// the medium column.
pub fn dashboard_ttl(window: Window, scale: SystemScale) -> u64 {
    let (small, medium, large, xlarge): (u64, u64, u64, u64) = match window {
        Window::H1 => (30, 60, 120, 180),
        Window::H3 | Window::H6 | Window::H12 | Window::H24 => (60, 120, 180, 300),
        Window::D3 => (300, 600, 1800, 3600),
        Window::D7 => (300, 900, 2700, 5400),
        Window::D14 => (600, 1200, 3600, 7200),
    };
    match scale {
        SystemScale::Small => small,
        SystemScale::Medium | SystemScale::Tiny => medium,
        SystemScale::Large => large,
        SystemScale::XLarge => xlarge,
    }
}

/// Multiplier for cache entries without a window of their own (channels,
/// trends, snapshots).
pub fn ttl_multiplier(scale: SystemScale) -> f64 {
    match scale {
        SystemScale::Tiny => 0.5,
        SystemScale::Small => 1.0,
        SystemScale::Medium => 2.0,
        SystemScale::Large => 5.0,
        SystemScale::XLarge => 10.0,
    }
}

pub fn scaled_ttl(base_seconds: u64, scale: SystemScale) -> u64 {
    ((base_seconds as f64) * ttl_multiplier(scale)).round() as u64
}

/// TTL for detector results.
pub fn detector_ttl(scale: SystemScale) -> u64 {
    match scale {
        SystemScale::Tiny => 120,
        SystemScale::Small => 300,
        SystemScale::Medium => 600,
        SystemScale::Large => 1200,
        SystemScale::XLarge => 1800,
    }
}

/// TTL for the IP distribution blobs, per window.
pub fn ip_distribution_ttl(window: Window) -> u64 {
    match window {
        Window::H1 => 300,
        Window::H6 => 900,
        Window::D7 => 3600,
        _ => 1800,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        assert_eq!(SystemScale::classify(10, 100, 1000), SystemScale::Tiny);
        assert_eq!(SystemScale::classify(200, 0, 0), SystemScale::Small);
        assert_eq!(SystemScale::classify(2_000, 0, 0), SystemScale::Medium);
        assert_eq!(SystemScale::classify(0, 1_000_000, 0), SystemScale::Large);
        assert_eq!(SystemScale::classify(60_000, 0, 0), SystemScale::XLarge);
    }

    #[test]
    fn ttl_grows_with_window_and_scale() {
        assert_eq!(dashboard_ttl(Window::H1, SystemScale::Small), 30);
        assert_eq!(dashboard_ttl(Window::H24, SystemScale::XLarge), 300);
        assert_eq!(dashboard_ttl(Window::D3, SystemScale::Large), 1800);
        assert_eq!(dashboard_ttl(Window::D7, SystemScale::Medium), 900);
        assert_eq!(dashboard_ttl(Window::D14, SystemScale::XLarge), 7200);
        // Tiny deployments use the medium column.
        assert_eq!(
            dashboard_ttl(Window::D7, SystemScale::Tiny),
            dashboard_ttl(Window::D7, SystemScale::Medium)
        );
    }

    #[test]
    fn multiplier_scaling() {
        assert_eq!(scaled_ttl(600, SystemScale::Small), 600);
        assert_eq!(scaled_ttl(600, SystemScale::Large), 3000);
        assert_eq!(scaled_ttl(600, SystemScale::Tiny), 300);
    }

    #[test]
    fn scale_u8_round_trip() {
        for scale in [
            SystemScale::Tiny,
            SystemScale::Small,
            SystemScale::Medium,
            SystemScale::Large,
            SystemScale::XLarge,
        ] {
            assert_eq!(SystemScale::from_u8(scale.as_u8()), scale);
        }
    }
}
