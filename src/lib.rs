//! Vigil Library
//!
//! Moderation and analytics sidecar for an LLM API gateway: cached
//! dashboards, abuse detectors and the AI-adjudicated auto-ban pipeline.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod cache;
pub mod config;
pub mod db;
pub mod geo;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    AiBanService, AutoGroupService, DashboardService, IpDistributionService, ModelStatusService,
    RiskService, ScaleService,
};
pub use utils::JwtUtil;

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. All services are wrapped in Arc for cheap cloning and thread
/// safety; there are no module-level singletons.
#[derive(Clone)]
pub struct AppState {
    pub local_db: SqlitePool,
    pub jwt_util: Arc<JwtUtil>,
    pub auth_config: config::AuthConfig,

    pub cache: Arc<cache::CacheTier>,
    pub local_cache: Arc<store::LocalCache>,
    pub config_store: Arc<store::ConfigStore>,
    pub audit_store: Arc<store::AuditStore>,
    pub log_store: Arc<store::LogStore>,
    pub writer: Arc<store::GatewayWriter>,
    pub geo: Arc<geo::GeoService>,

    pub scale_service: Arc<ScaleService>,
    pub dashboard_service: Arc<DashboardService>,
    pub model_status_service: Arc<ModelStatusService>,
    pub risk_service: Arc<RiskService>,
    pub ip_distribution_service: Arc<IpDistributionService>,
    pub ai_ban_service: Arc<AiBanService>,
    pub auto_group_service: Arc<AutoGroupService>,
}
