//! Startup warmup of the heavy caches.
//!
//! A cold 7d leaderboard or dashboard can take minutes of scanning on large
//! installations; warming them in the background right after boot means the
//! first operator request hits finalized slots instead of the log table.

use std::sync::Arc;

use crate::services::dashboard_service::DashboardService;
use crate::services::ip_distribution_service::IpDistributionService;
use crate::services::risk::RiskService;
use crate::utils::Window;

pub struct WarmupTask {
    pub dashboard: Arc<DashboardService>,
    pub risk: Arc<RiskService>,
    pub ip_distribution: Arc<IpDistributionService>,
}

impl WarmupTask {
    pub fn spawn(self) {
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            tracing::info!("cache warmup started");
            self.run().await;
            tracing::info!("cache warmup finished in {:.1}s", started.elapsed().as_secs_f64());
        });
    }

    async fn run(&self) {
        // Short windows first so the landing page is fast, then the
        // slot-backed long windows.
        for window in [Window::H24, Window::D3, Window::D7, Window::D14] {
            if let Err(e) = self.dashboard.usage_statistics(window, true).await {
                tracing::warn!("warmup usage {} failed: {}", window.as_str(), e);
            }
            if let Err(e) = self.dashboard.model_usage(window, 10, true).await {
                tracing::warn!("warmup models {} failed: {}", window.as_str(), e);
            }
            if let Err(e) = self.dashboard.top_users(window, 10, true).await {
                tracing::warn!("warmup top users {} failed: {}", window.as_str(), e);
            }
        }
        if let Err(e) = self.dashboard.system_overview(Window::H24, true).await {
            tracing::warn!("warmup overview failed: {}", e);
        }

        for window in [Window::D3, Window::D7] {
            if let Err(e) = self.risk.shared_ips(window, 2, 50, true).await {
                tracing::warn!("warmup shared ips {} failed: {}", window.as_str(), e);
            }
            if let Err(e) = self.risk.multi_ip_tokens(window, 2, 50, true).await {
                tracing::warn!("warmup multi-ip tokens {} failed: {}", window.as_str(), e);
            }
            if let Err(e) = self.risk.multi_ip_users(window, 3, 50, true).await {
                tracing::warn!("warmup multi-ip users {} failed: {}", window.as_str(), e);
            }
        }

        for window in [Window::H1, Window::H6, Window::H24, Window::D7] {
            if let Err(e) = self.ip_distribution.distribution(window, true).await {
                tracing::warn!("warmup ip distribution {} failed: {}", window.as_str(), e);
            }
        }
    }
}
