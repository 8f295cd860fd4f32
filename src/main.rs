use axum::{
    Router,
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vigil::config::Config;
use vigil::services::ai_ban::client::OpenAiChatClient;
use vigil::services::{
    AiBanService, AutoGroupService, DashboardService, IpDistributionService, MaintenanceTask,
    ModelStatusService, RiskService, ScaleService, WarmupTask,
};
use vigil::store::{
    AuditStore, ConfigStore, GatewayClient, GatewayWriter, LocalCache, LogStore,
    ensure_recommended_indexes,
};
use vigil::utils::{JwtUtil, ScheduledExecutor};
use vigil::{AppState, cache, db, geo, handlers, middleware};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::dashboard::overview,
        handlers::dashboard::usage,
        handlers::dashboard::models,
        handlers::dashboard::top_users,
        handlers::dashboard::daily_trends,
        handlers::dashboard::hourly_trends,
        handlers::dashboard::channels,
        handlers::dashboard::ip_distribution,
        handlers::risk::leaderboards,
        handlers::risk::user_analysis,
        handlers::model_status::model_status,
        handlers::ai_ban::run_scan,
        handlers::auto_group::run_scan,
    ),
    components(
        schemas(
            vigil::models::gateway::SystemOverview,
            vigil::models::gateway::ModelUsage,
            vigil::models::gateway::UserRanking,
            vigil::models::gateway::DailyTrend,
            vigil::models::gateway::HourlyTrend,
            vigil::models::gateway::ChannelStatus,
            vigil::models::behavior::UserBehavior,
            vigil::models::behavior::LeaderboardEntry,
            vigil::models::behavior::RiskFlag,
            vigil::services::dashboard_service::UsageReport,
            vigil::services::model_status_service::ModelStatus,
            vigil::services::ai_ban::ScanReport,
            vigil::services::auto_group_service::GroupScanReport,
        )
    ),
    tags(
        (name = "Dashboard", description = "Cached analytics over the gateway log table"),
        (name = "Risk", description = "Abuse detectors and per-user behavior analysis"),
        (name = "ModelStatus", description = "Per-model success-rate heat-map"),
        (name = "AiBan", description = "AI-adjudicated auto-ban pipeline"),
        (name = "AutoGroup", description = "Registration-source based re-grouping"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("vigil.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Vigil starting up");

    // Local SQLite store (cache mirror, config, audit trails).
    let local_db = db::create_pool(&config.local_db.path).await?;
    tracing::info!("local store ready at {}", config.local_db.path);

    // Gateway database (read-mostly).
    let gateway = Arc::new(GatewayClient::connect(&config.gateway)?);
    tracing::info!(
        "gateway client configured ({} @ {}:{})",
        config.gateway.engine,
        config.gateway.host,
        config.gateway.port
    );
    ensure_recommended_indexes(&gateway).await;

    // Cache tier: Redis primary when configured, SQLite mirror always.
    let redis = match &config.redis.url {
        Some(url) => cache::CacheTier::connect_redis(url).await,
        None => None,
    };
    let cache_tier = cache::CacheTier::new(local_db.clone(), redis);

    let jwt_util = Arc::new(JwtUtil::new(&config.auth.jwt_secret, config.auth.jwt_expire_hours));
    let local_cache = Arc::new(LocalCache::new(local_db.clone()));
    let config_store = Arc::new(ConfigStore::new(local_db.clone()));
    let audit_store = Arc::new(AuditStore::new(local_db.clone()));
    let log_store = Arc::new(LogStore::new(Arc::clone(&gateway)));
    let writer = Arc::new(GatewayWriter::new(
        Arc::clone(&gateway),
        Arc::clone(&audit_store),
        Arc::clone(&cache_tier),
    ));

    // No MMDB reader is wired in this build; geo lookups degrade to cached
    // negatives and dual-stack detection stays off.
    let geo_service = Arc::new(geo::GeoService::disabled());

    let scale_service = Arc::new(ScaleService::new(Arc::clone(&log_store)));
    if let Err(e) = scale_service.detect().await {
        tracing::warn!("initial scale detection failed: {}", e);
    }

    let dashboard_service = Arc::new(DashboardService::new(
        Arc::clone(&log_store),
        Arc::clone(&cache_tier),
        Arc::clone(&audit_store),
        Arc::clone(&scale_service),
    ));
    let model_status_service =
        Arc::new(ModelStatusService::new(Arc::clone(&log_store), Arc::clone(&cache_tier)));
    let risk_service = Arc::new(RiskService::new(
        Arc::clone(&log_store),
        Arc::clone(&cache_tier),
        Arc::clone(&geo_service),
        Arc::clone(&audit_store),
        Arc::clone(&scale_service),
    ));
    let ip_distribution_service = Arc::new(IpDistributionService::new(
        Arc::clone(&log_store),
        Arc::clone(&cache_tier),
        Arc::clone(&geo_service),
    ));

    let ai_ban_service = Arc::new(AiBanService::new(
        Arc::clone(&config_store),
        Arc::clone(&local_cache),
        Arc::clone(&audit_store),
        Arc::clone(&risk_service),
        Arc::clone(&log_store),
        Arc::clone(&writer) as Arc<dyn vigil::services::ModerationExecutor>,
        Arc::new(OpenAiChatClient::new()),
    ));
    if let Err(e) = ai_ban_service.ensure_default_whitelist().await {
        tracing::warn!("AI ban whitelist bootstrap failed: {}", e);
    }

    let auto_group_service = Arc::new(AutoGroupService::new(
        Arc::clone(&config_store),
        Arc::clone(&log_store),
        Arc::clone(&writer),
        Arc::clone(&audit_store),
    ));

    let app_state = Arc::new(AppState {
        local_db: local_db.clone(),
        jwt_util: Arc::clone(&jwt_util),
        auth_config: config.auth.clone(),
        cache: Arc::clone(&cache_tier),
        local_cache: Arc::clone(&local_cache),
        config_store: Arc::clone(&config_store),
        audit_store: Arc::clone(&audit_store),
        log_store: Arc::clone(&log_store),
        writer: Arc::clone(&writer),
        geo: Arc::clone(&geo_service),
        scale_service: Arc::clone(&scale_service),
        dashboard_service: Arc::clone(&dashboard_service),
        model_status_service: Arc::clone(&model_status_service),
        risk_service: Arc::clone(&risk_service),
        ip_distribution_service: Arc::clone(&ip_distribution_service),
        ai_ban_service: Arc::clone(&ai_ban_service),
        auto_group_service: Arc::clone(&auto_group_service),
    });

    // Background tasks.
    {
        let executor = ScheduledExecutor::new("scale-detector", Duration::from_secs(600));
        let service = Arc::clone(&scale_service);
        tokio::spawn(async move { executor.start(service).await });
    }
    {
        let executor = ScheduledExecutor::new("ai-ban-scan", Duration::from_secs(60));
        let service = Arc::clone(&ai_ban_service);
        tokio::spawn(async move { executor.start(service).await });
    }
    {
        let executor = ScheduledExecutor::new("auto-group-scan", Duration::from_secs(60));
        let service = Arc::clone(&auto_group_service);
        tokio::spawn(async move { executor.start(service).await });
    }
    {
        let executor = ScheduledExecutor::new("local-store-maintenance", Duration::from_secs(3600));
        let task = Arc::new(MaintenanceTask {
            cache: Arc::clone(&cache_tier),
            local_cache: Arc::clone(&local_cache),
            audit: Arc::clone(&audit_store),
        });
        tokio::spawn(async move { executor.start(task).await });
    }

    if config.warmup.enabled {
        WarmupTask {
            dashboard: Arc::clone(&dashboard_service),
            risk: Arc::clone(&risk_service),
            ip_distribution: Arc::clone(&ip_distribution_service),
        }
        .spawn();
    }

    // Routing.
    let auth_state = middleware::AuthState {
        api_key: config.auth.api_key.clone(),
        jwt_util: Arc::clone(&jwt_util),
    };

    let public_routes = Router::new()
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .with_state(Arc::clone(&app_state));

    let protected_routes = Router::new()
        .route("/api/dashboard/overview", get(handlers::dashboard::overview))
        .route("/api/dashboard/usage", get(handlers::dashboard::usage))
        .route("/api/dashboard/models", get(handlers::dashboard::models))
        .route("/api/dashboard/top-users", get(handlers::dashboard::top_users))
        .route("/api/dashboard/trends/daily", get(handlers::dashboard::daily_trends))
        .route("/api/dashboard/trends/hourly", get(handlers::dashboard::hourly_trends))
        .route("/api/dashboard/channels", get(handlers::dashboard::channels))
        .route("/api/dashboard/ip-distribution", get(handlers::dashboard::ip_distribution))
        .route("/api/dashboard/cache/invalidate", post(handlers::dashboard::invalidate_cache))
        .route("/api/risk/leaderboards", get(handlers::risk::leaderboards))
        .route("/api/risk/users/:id/analysis", get(handlers::risk::user_analysis))
        .route("/api/risk/users/:id/ban-record", get(handlers::risk::latest_ban_record))
        .route("/api/risk/users/:id/ban", post(handlers::risk::ban_user))
        .route("/api/risk/users/:id/unban", post(handlers::risk::unban_user))
        .route("/api/risk/ban-records", get(handlers::risk::ban_records))
        .route("/api/risk/shared-ips", get(handlers::risk::shared_ips))
        .route("/api/risk/multi-ip-tokens", get(handlers::risk::multi_ip_tokens))
        .route("/api/risk/multi-ip-users", get(handlers::risk::multi_ip_users))
        .route("/api/risk/token-rotation", get(handlers::risk::token_rotation))
        .route("/api/risk/affiliated-accounts", get(handlers::risk::affiliated_accounts))
        .route("/api/risk/same-ip-registrations", get(handlers::risk::same_ip_registrations))
        .route("/api/risk/ip/:ip/users", get(handlers::risk::ip_users))
        .route("/api/risk/ip-stats", get(handlers::risk::ip_stats))
        .route("/api/risk/ip-recording/enable-all", post(handlers::risk::enable_all_ip_recording))
        .route("/api/model-status/windows", get(handlers::model_status::windows))
        .route("/api/model-status/models", get(handlers::model_status::available_models))
        .route("/api/model-status/status/batch", post(handlers::model_status::batch_status))
        .route("/api/model-status/status/:model", get(handlers::model_status::model_status))
        .route("/api/ai-ban/scan", post(handlers::ai_ban::run_scan))
        .route(
            "/api/ai-ban/config",
            get(handlers::ai_ban::get_config).post(handlers::ai_ban::save_config),
        )
        .route("/api/ai-ban/logs", get(handlers::ai_ban::scan_logs))
        .route(
            "/api/ai-ban/whitelist",
            get(handlers::ai_ban::whitelist).post(handlers::ai_ban::add_whitelist),
        )
        .route("/api/ai-ban/whitelist/:user_id", delete(handlers::ai_ban::remove_whitelist))
        .route("/api/ai-ban/models", get(handlers::ai_ban::list_models))
        .route("/api/ai-ban/test-model", post(handlers::ai_ban::test_model))
        .route("/api/ai-ban/reset-health", post(handlers::ai_ban::reset_health))
        .route("/api/ai-ban/available-groups", get(handlers::ai_ban::available_groups))
        .route("/api/ai-ban/available-models", get(handlers::ai_ban::available_models))
        .route(
            "/api/auto-group/config",
            get(handlers::auto_group::get_config).post(handlers::auto_group::save_config),
        )
        .route("/api/auto-group/preview", get(handlers::auto_group::preview))
        .route("/api/auto-group/groups", get(handlers::auto_group::groups))
        .route("/api/auto-group/scan", post(handlers::auto_group::run_scan))
        .route("/api/auto-group/batch-move", post(handlers::auto_group::batch_move))
        .route("/api/auto-group/revert", post(handlers::auto_group::revert))
        .route("/api/auto-group/logs", get(handlers::auto_group::logs))
        .route("/api/auto-group/stats", get(handlers::auto_group::stats))
        .route("/api/system/scale", get(handlers::system::scale))
        .route("/api/redemptions/batch", post(handlers::system::insert_redemptions))
        .route("/api/risk/users/:id/ips", get(handlers::risk::user_ips))
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Vigil is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}
