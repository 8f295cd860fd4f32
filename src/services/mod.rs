pub mod ai_ban;
pub mod auto_group_service;
pub mod dashboard_service;
pub mod ip_distribution_service;
pub mod maintenance;
pub mod model_status_service;
pub mod risk;
pub mod scale_service;
pub mod warmup;

pub use ai_ban::{AiBanConfig, AiBanService, ModerationExecutor, ScanReport};
pub use auto_group_service::{AutoGroupConfig, AutoGroupService};
pub use dashboard_service::{DashboardService, UsageReport};
pub use ip_distribution_service::{IpDistribution, IpDistributionService};
pub use maintenance::MaintenanceTask;
pub use model_status_service::{ModelStatus, ModelStatusService};
pub use risk::{LeaderboardsReport, RiskService};
pub use scale_service::ScaleService;
pub use warmup::WarmupTask;
