//! HTTP client for the OpenAI-compatible adjudication endpoint, plus the API
//! health state machine guarding it.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

pub const ATTEMPT_TIMEOUT_SECONDS: u64 = 30;
pub const FAILURE_COOLDOWN_SECONDS: i64 = 300;
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    NotConfigured,

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM response parsing error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub owned_by: String,
    pub created: i64,
}

/// The outbound chat surface, as a trait so scans are testable with a
/// scripted double.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<ChatOutcome, LlmError>;

    async fn list_models(&self, base_url: &str, api_key: &str)
    -> Result<Vec<ModelEntry>, LlmError>;
}

/// Endpoint derivation: a base already ending in `/v1` gets the endpoint
/// appended directly, anything else gets `/v1` inserted.
pub fn endpoint_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/v1{}", base, endpoint)
    }
}

pub struct OpenAiChatClient {
    http: Client,
}

impl Default for OpenAiChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiChatClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(ATTEMPT_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn chat(
        &self,
        base_url: &str,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<ChatOutcome, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::NotConfigured);
        }

        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            temperature: Some(0.3),
            max_tokens: Some(max_tokens),
            // Best-effort; servers without structured-output support ignore
            // or reject it, and the verdict parser copes either way.
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = endpoint_url(base_url, "/chat/completions");
        tracing::debug!("calling moderation LLM: {} (model {})", url, model);

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(ATTEMPT_TIMEOUT_SECONDS))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(ATTEMPT_TIMEOUT_SECONDS)
                } else {
                    LlmError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, preview)));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| LlmError::Parse("empty response from LLM".to_string()))?;

        let usage = body.usage.unwrap_or_default();
        Ok(ChatOutcome {
            content,
            model: body.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            duration_ms,
        })
    }

    async fn list_models(
        &self,
        base_url: &str,
        api_key: &str,
    ) -> Result<Vec<ModelEntry>, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::NotConfigured);
        }
        let url = endpoint_url(base_url, "/models");

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() { LlmError::Timeout(15) } else { LlmError::Api(e.to_string()) }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Api(format!("HTTP {}", status)));
        }

        let body: ModelListResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let mut models: Vec<ModelEntry> = body
            .data
            .into_iter()
            .filter(|m| !m.id.is_empty())
            .map(|m| ModelEntry {
                id: m.id,
                owned_by: m.owned_by.unwrap_or_default(),
                created: m.created.unwrap_or(0),
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}

// ---------------------------------------------------------------------------
// API health state machine: Healthy -> Degraded -> Suspended -> Healthy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Suspended,
}

pub struct ApiHealth {
    consecutive_failures: AtomicU32,
    last_failure_at: AtomicI64,
    suspended: AtomicBool,
    last_error: Mutex<String>,
}

impl Default for ApiHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiHealth {
    pub fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_failure_at: AtomicI64::new(0),
            suspended: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
        }
    }

    pub fn state(&self) -> HealthState {
        if self.suspended.load(Ordering::Relaxed) {
            HealthState::Suspended
        } else if self.consecutive_failures.load(Ordering::Relaxed) > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        if self.consecutive_failures() == 0 {
            return None;
        }
        let error = self.last_error.lock().unwrap();
        if error.is_empty() { None } else { Some(error.clone()) }
    }

    /// Any successful call returns the machine to Healthy.
    pub fn record_success(&self) {
        let failures = self.consecutive_failures.swap(0, Ordering::Relaxed);
        if failures > 0 {
            tracing::info!("moderation LLM recovered after {} consecutive failures", failures);
        }
        self.suspended.store(false, Ordering::Relaxed);
        self.last_error.lock().unwrap().clear();
    }

    /// Returns true when this failure tripped the breaker open.
    pub fn record_failure(&self, error: &str, now: i64) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_at.store(now, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = error.to_string();

        if failures >= MAX_CONSECUTIVE_FAILURES && !self.suspended.swap(true, Ordering::Relaxed) {
            tracing::error!(
                "moderation LLM suspended after {} consecutive failures; cooldown {}s",
                failures,
                FAILURE_COOLDOWN_SECONDS
            );
            return true;
        }
        false
    }

    /// Remaining suspension, if any. Opportunistically closes the breaker
    /// once the cooldown has elapsed.
    pub fn suspension_remaining(&self, now: i64) -> Option<i64> {
        if !self.suspended.load(Ordering::Relaxed) {
            return None;
        }
        let elapsed = now - self.last_failure_at.load(Ordering::Relaxed);
        if elapsed >= FAILURE_COOLDOWN_SECONDS {
            tracing::info!("moderation LLM cooldown elapsed; attempting recovery");
            self.suspended.store(false, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            None
        } else {
            Some(FAILURE_COOLDOWN_SECONDS - elapsed)
        }
    }

    /// Manual operator reset.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_failure_at.store(0, Ordering::Relaxed);
        self.suspended.store(false, Ordering::Relaxed);
        self.last_error.lock().unwrap().clear();
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: i64,
    #[serde(default)]
    completion_tokens: i64,
    #[serde(default)]
    total_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    #[serde(default)]
    id: String,
    owned_by: Option<String>,
    created: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_derivation() {
        assert_eq!(
            endpoint_url("https://api.openai.com/v1", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.openai.com/v1/", "/models"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            endpoint_url("https://proxy.example.com", "/chat/completions"),
            "https://proxy.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn breaker_opens_at_exactly_five_failures() {
        let health = ApiHealth::new();
        let now = 1000;

        for i in 1..MAX_CONSECUTIVE_FAILURES {
            assert!(!health.record_failure("boom", now));
            assert_eq!(health.state(), HealthState::Degraded, "failure {}", i);
        }
        assert!(health.record_failure("boom", now));
        assert_eq!(health.state(), HealthState::Suspended);
        assert_eq!(health.suspension_remaining(now), Some(FAILURE_COOLDOWN_SECONDS));
    }

    #[test]
    fn breaker_closes_after_cooldown() {
        let health = ApiHealth::new();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            health.record_failure("boom", 1000);
        }
        assert!(health.suspension_remaining(1000 + 299).is_some());
        // Cooldown elapsed: opportunistic recovery.
        assert!(health.suspension_remaining(1000 + FAILURE_COOLDOWN_SECONDS).is_none());
        assert_eq!(health.state(), HealthState::Healthy);
    }

    #[test]
    fn success_resets_from_any_state() {
        let health = ApiHealth::new();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            health.record_failure("boom", 1000);
        }
        health.record_success();
        assert_eq!(health.state(), HealthState::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
        assert!(health.last_error().is_none());
    }

    #[test]
    fn manual_reset_forces_healthy() {
        let health = ApiHealth::new();
        health.record_failure("boom", 1000);
        health.reset();
        assert_eq!(health.state(), HealthState::Healthy);
    }
}
