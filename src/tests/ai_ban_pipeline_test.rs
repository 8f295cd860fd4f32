//! End-to-end pipeline behavior at the seam level: dry-run isolation,
//! cooldowns, whitelist short-circuit and the circuit breaker.

use crate::services::ai_ban::AiBanConfig;
use crate::services::ai_ban::client::HealthState;
use crate::tests::common::{BAN_VERDICT_JSON, pipeline_fixture, risky_behavior};
use crate::utils::now_ts;

fn live_config() -> AiBanConfig {
    AiBanConfig {
        enabled: true,
        dry_run: false,
        api_key: "sk-test".to_string(),
        base_url: "http://llm.internal".to_string(),
        model: "adjudicator-1".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn dry_run_ban_produces_no_mutation_and_no_ban_audit() {
    let fixture = pipeline_fixture().await;
    let config = AiBanConfig { dry_run: true, ..live_config() };
    let behavior = risky_behavior(42, 200);

    fixture.chat.push_ok(BAN_VERDICT_JSON);
    let result = fixture.service.process_user(&config, &behavior).await;

    assert_eq!(result.action, "ban");
    assert!(!result.executed);
    assert!(result.message.contains("试运行"));

    // Dry-run isolation: the executor never ran and security_audit holds no
    // ban row for the user.
    assert_eq!(fixture.executor.ban_count(), 0);
    assert_eq!(fixture.audit.count_ban_rows(42).await.unwrap(), 0);

    // The verdict still arms the cooldown.
    assert!(fixture.local_cache.contains("ai_ban_cooldown:42").await.unwrap());
}

#[tokio::test]
async fn live_ban_executes_with_audit_context() {
    let fixture = pipeline_fixture().await;
    let config = live_config();
    let behavior = risky_behavior(42, 200);

    fixture.chat.push_ok(BAN_VERDICT_JSON);
    let result = fixture.service.process_user(&config, &behavior).await;

    assert_eq!(result.action, "ban");
    assert!(result.executed);
    assert_eq!(fixture.executor.ban_count(), 1);

    let bans = fixture.executor.bans.lock().unwrap();
    assert_eq!(bans[0].0, 42);
    assert!(bans[0].1.starts_with("[AI自动封禁]"));
}

#[tokio::test]
async fn warn_verdict_writes_ai_warn_audit_only_when_live() {
    let fixture = pipeline_fixture().await;
    let behavior = risky_behavior(7, 120);

    let warn = r#"{"should_ban": false, "risk_score": 6, "confidence": 0.5, "reason": "borderline"}"#;

    let dry = AiBanConfig { dry_run: true, ..live_config() };
    fixture.chat.push_ok(warn);
    let result = fixture.service.process_user(&dry, &behavior).await;
    assert_eq!(result.action, "warn");
    let page = fixture
        .audit
        .list_security_audits(1, 10, Some("ai_warn"), None)
        .await
        .unwrap();
    assert_eq!(page.total, 0);

    fixture.service.clear_cooldown(7).await;
    fixture.chat.push_ok(warn);
    let live = live_config();
    let result = fixture.service.process_user(&live, &behavior).await;
    assert_eq!(result.action, "warn");
    let page = fixture
        .audit
        .list_security_audits(1, 10, Some("ai_warn"), None)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].user_id, 7);
}

#[tokio::test]
async fn whitelisted_users_skip_without_llm_call() {
    let fixture = pipeline_fixture().await;
    let config = AiBanConfig { whitelist_ids: vec![42], ..live_config() };
    let behavior = risky_behavior(42, 500);

    let result = fixture.service.process_user(&config, &behavior).await;
    assert_eq!(result.action, "skip");
    assert_eq!(fixture.chat.call_count(), 0);
    assert_eq!(fixture.executor.ban_count(), 0);

    // Root user and admins are always whitelisted, independent of the set.
    let root = risky_behavior(1, 500);
    let result = fixture.service.process_user(&live_config(), &root).await;
    assert_eq!(result.action, "skip");
    assert_eq!(fixture.chat.call_count(), 0);
}

#[tokio::test]
async fn unparseable_verdict_is_an_error_and_leaves_no_cooldown() {
    let fixture = pipeline_fixture().await;
    let config = live_config();
    let behavior = risky_behavior(9, 100);

    fixture.chat.push_ok("I refuse to answer in JSON.");
    let result = fixture.service.process_user(&config, &behavior).await;

    assert_eq!(result.action, "error");
    assert!(result.message.contains("解析失败"));
    assert_eq!(fixture.executor.ban_count(), 0);
    // Parse failures do not burn the user's cooldown.
    assert!(!fixture.local_cache.contains("ai_ban_cooldown:9").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn repeated_api_failures_open_the_breaker_and_short_circuit() {
    let fixture = pipeline_fixture().await;
    let config = live_config();

    // 5 users, each failing all 3 attempts -> 5 consecutive call failures.
    for user_id in 100..105 {
        for _ in 0..3 {
            fixture.chat.push_err("connection refused");
        }
        let behavior = risky_behavior(user_id, 100);
        let result = fixture.service.process_user(&config, &behavior).await;
        assert_eq!(result.action, "error");
    }
    assert_eq!(fixture.chat.call_count(), 15);
    assert_eq!(fixture.service.health().state(), HealthState::Suspended);

    // While suspended the pipeline never invokes the LLM.
    let behavior = risky_behavior(200, 100);
    let result = fixture.service.process_user(&config, &behavior).await;
    assert_eq!(result.action, "error");
    assert!(result.message.contains("暂停"));
    assert_eq!(fixture.chat.call_count(), 15);

    // After the 300 s cooldown plus one successful call, Healthy again.
    assert!(
        fixture
            .service
            .health()
            .suspension_remaining(now_ts() + 300)
            .is_none()
    );
    fixture.service.clear_cooldown(200).await;
    fixture.chat.push_ok(BAN_VERDICT_JSON);
    let result = fixture.service.process_user(&config, &behavior).await;
    assert_eq!(result.action, "ban");
    assert_eq!(fixture.service.health().state(), HealthState::Healthy);
}

#[tokio::test]
async fn save_config_round_trips_and_masks_key() {
    let fixture = pipeline_fixture().await;

    fixture
        .service
        .save_config(&serde_json::json!({
            "enabled": true,
            "api_key": "sk-abcdefghijkl",
            "model": "adjudicator-1",
            "scan_interval_minutes": 30,
        }))
        .await
        .unwrap();

    let config = fixture.service.load_config().await.unwrap();
    assert!(config.enabled);
    assert_eq!(config.scan_interval_minutes, 30);
    // Defaults survive the partial update.
    assert!(config.dry_run);

    let report = fixture.service.config_report().await.unwrap();
    assert_eq!(report["has_api_key"], true);
    assert_eq!(report["masked_api_key"], "sk-a********ijkl");
    assert!(report.get("api_key").is_none());
}
