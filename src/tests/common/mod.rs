// Common test utilities: in-memory stores, scripted doubles for the external
// seams (chat backend, moderation executor) and behavior-record builders.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cache::CacheTier;
use crate::config::GatewayConfig;
use crate::db::create_memory_pool;
use crate::geo::GeoService;
use crate::models::behavior::{
    BehaviorSummary, BehaviorUser, IpSwitchAnalysis, RiskFlag, RiskSection, UserBehavior,
};
use crate::services::ai_ban::client::{ChatBackend, ChatOutcome, LlmError, ModelEntry};
use crate::services::ai_ban::{AiBanService, ModerationExecutor};
use crate::services::risk::RiskService;
use crate::services::scale_service::ScaleService;
use crate::store::{AuditStore, ConfigStore, GatewayClient, LocalCache, LogStore};

/// A gateway client that never connects; pools are lazy, so it is safe to
/// construct for tests that never run a gateway query.
pub fn offline_gateway() -> Arc<GatewayClient> {
    let config = GatewayConfig {
        engine: "mysql".to_string(),
        host: "127.0.0.1".to_string(),
        port: 1,
        user: "test".to_string(),
        password: String::new(),
        database: "test".to_string(),
        max_connections: 1,
    };
    Arc::new(GatewayClient::connect(&config).expect("offline gateway client"))
}

/// Scripted chat backend: pops one queued reply per call.
pub struct MockChat {
    replies: Mutex<VecDeque<Result<String, String>>>,
    pub calls: AtomicU32,
}

impl MockChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(VecDeque::new()), calls: AtomicU32::new(0) })
    }

    pub fn push_ok(&self, content: &str) {
        self.replies.lock().unwrap().push_back(Ok(content.to_string()));
    }

    pub fn push_err(&self, message: &str) {
        self.replies.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for MockChat {
    async fn chat(
        &self,
        _base_url: &str,
        _api_key: &str,
        model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
        _max_tokens: u32,
    ) -> Result<ChatOutcome, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(content)) => Ok(ChatOutcome {
                content,
                model: model.to_string(),
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                duration_ms: 5,
            }),
            Some(Err(message)) => Err(LlmError::Api(message)),
            None => Err(LlmError::Api("no scripted reply".to_string())),
        }
    }

    async fn list_models(
        &self,
        _base_url: &str,
        _api_key: &str,
    ) -> Result<Vec<ModelEntry>, LlmError> {
        Ok(vec![ModelEntry { id: "mock-model".to_string(), owned_by: "test".to_string(), created: 0 }])
    }
}

/// Records ban requests instead of touching the gateway.
#[derive(Default)]
pub struct RecordingExecutor {
    pub bans: Mutex<Vec<(i64, String)>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ban_count(&self) -> usize {
        self.bans.lock().unwrap().len()
    }
}

#[async_trait]
impl ModerationExecutor for RecordingExecutor {
    async fn ban_user(
        &self,
        user_id: i64,
        reason: &str,
        _disable_tokens: bool,
        _operator: &str,
        _context: serde_json::Value,
    ) -> Result<(), String> {
        self.bans.lock().unwrap().push((user_id, reason.to_string()));
        Ok(())
    }
}

pub struct PipelineFixture {
    pub service: Arc<AiBanService>,
    pub chat: Arc<MockChat>,
    pub executor: Arc<RecordingExecutor>,
    pub audit: Arc<AuditStore>,
    pub local_cache: Arc<LocalCache>,
}

/// Wire an AiBanService against in-memory stores, a scripted chat backend
/// and a recording executor. The gateway client stays offline; only code
/// paths that avoid gateway queries may be exercised.
pub async fn pipeline_fixture() -> PipelineFixture {
    let pool = create_memory_pool().await.expect("memory pool");
    let cache = CacheTier::new(pool.clone(), None);
    let local_cache = Arc::new(LocalCache::new(pool.clone()));
    let config_store = Arc::new(ConfigStore::new(pool.clone()));
    let audit = Arc::new(AuditStore::new(pool.clone()));
    let log_store = Arc::new(LogStore::new(offline_gateway()));
    let geo = Arc::new(GeoService::disabled());
    let scale = Arc::new(ScaleService::new(Arc::clone(&log_store)));
    let risk = Arc::new(RiskService::new(
        Arc::clone(&log_store),
        Arc::clone(&cache),
        geo,
        Arc::clone(&audit),
        scale,
    ));

    let chat = MockChat::new();
    let executor = RecordingExecutor::new();
    let service = Arc::new(AiBanService::new(
        config_store,
        Arc::clone(&local_cache),
        Arc::clone(&audit),
        risk,
        log_store,
        Arc::clone(&executor) as Arc<dyn ModerationExecutor>,
        Arc::clone(&chat) as Arc<dyn ChatBackend>,
    ));

    PipelineFixture { service, chat, executor, audit, local_cache }
}

/// A behavior record with the rapid-switch risk profile used by the
/// pipeline tests.
pub fn risky_behavior(user_id: i64, total_requests: i64) -> UserBehavior {
    UserBehavior {
        user: BehaviorUser {
            id: user_id,
            username: format!("user{}", user_id),
            display_name: String::new(),
            group: "default".to_string(),
            role: 1,
            status: 1,
        },
        window: "1h".to_string(),
        end_time: 0,
        summary: BehaviorSummary {
            total_requests,
            unique_models: 2,
            unique_tokens: 3,
            unique_ips: 12,
        },
        risk: RiskSection {
            risk_flags: vec![RiskFlag::IpRapidSwitch],
            ip_switch_analysis: IpSwitchAnalysis {
                switch_count: 20,
                real_switch_count: 18,
                dual_stack_switches: 2,
                rapid_switch_count: 9,
                avg_ip_duration: 12.0,
                min_switch_interval: 4,
            },
        },
        top_ips: Vec::new(),
        top_models: Vec::new(),
        top_groups: Vec::new(),
        ips: Vec::new(),
    }
}

pub const BAN_VERDICT_JSON: &str =
    r#"{"should_ban": true, "risk_score": 9, "confidence": 0.9, "reason": "频繁切换 IP"}"#;
