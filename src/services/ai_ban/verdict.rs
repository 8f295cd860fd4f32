//! Verdict parsing for the AI adjudicator.
//!
//! Models wrap their JSON in markdown fences, prose, or worse. Extraction
//! tries, in order: the whole string, a ```json block, any ``` block, the
//! first-`{`-to-last-`}` substring, and finally brace-balancing outward from
//! the `"should_ban"` key.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const RISK_SCORE_BAN_THRESHOLD: i64 = 8;
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BanAction {
    Ban,
    Warn,
    Monitor,
    Skip,
}

impl BanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ban => "ban",
            Self::Warn => "warn",
            Self::Monitor => "monitor",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Verdict {
    pub should_ban: bool,
    pub risk_score: i64,
    pub confidence: f64,
    pub reason: String,
    pub action: BanAction,
}

static SHOULD_BAN_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""should_ban""#).expect("static regex"));

/// Map a validated assessment onto an action.
pub fn action_for(should_ban: bool, risk_score: i64, confidence: f64) -> BanAction {
    if should_ban && risk_score >= RISK_SCORE_BAN_THRESHOLD && confidence >= CONFIDENCE_THRESHOLD {
        BanAction::Ban
    } else if should_ban || risk_score >= 6 {
        BanAction::Warn
    } else if risk_score >= 4 {
        BanAction::Monitor
    } else {
        BanAction::Skip
    }
}

fn valid_json(candidate: &str) -> Option<serde_json::Value> {
    serde_json::from_str(candidate.trim()).ok()
}

/// Pull a JSON object out of a chat completion. Returns the candidate string
/// and the extraction method that produced it (for diagnostics).
pub fn extract_json(content: &str) -> Option<(String, &'static str)> {
    let trimmed = content.trim();
    if valid_json(trimmed).is_some() {
        return Some((trimmed.to_string(), "direct"));
    }

    if let Some(rest) = content.split("```json").nth(1)
        && let Some(block) = rest.split("```").next()
    {
        let block = block.trim();
        if valid_json(block).is_some() {
            return Some((block.to_string(), "json_code_block"));
        }
    }

    if let Some(block) = content.split("```").nth(1) {
        let block = block.trim();
        if valid_json(block).is_some() {
            return Some((block.to_string(), "code_block"));
        }
    }

    if let (Some(first), Some(last)) = (content.find('{'), content.rfind('}'))
        && last > first
    {
        let candidate = &content[first..=last];
        if valid_json(candidate).is_some() {
            return Some((candidate.to_string(), "brace_extract"));
        }
    }

    // Locate the key, walk back to the nearest '{', then balance braces
    // forward.
    if let Some(key_match) = SHOULD_BAN_KEY.find(content)
        && let Some(open) = content[..key_match.start()].rfind('{')
    {
        let mut depth = 0i32;
        for (offset, ch) in content[open..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &content[open..=open + offset];
                        if valid_json(candidate).is_some() {
                            return Some((candidate.to_string(), "nested_extract"));
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    None
}

/// Parse the completion into a verdict. `None` means unparseable; the caller
/// records an error entry and the scan continues.
pub fn parse_verdict(content: &str) -> Option<Verdict> {
    if content.trim().is_empty() {
        return None;
    }
    let (candidate, method) = extract_json(content)?;
    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;

    // `should_ban` is the one required key.
    let should_ban = match value.get("should_ban") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => {
            tracing::error!("verdict missing required key should_ban (method={})", method);
            return None;
        }
    };

    let risk_score = value
        .get("risk_score")
        .and_then(coerce_i64)
        .unwrap_or(1)
        .clamp(1, 10);
    let confidence = value
        .get("confidence")
        .and_then(coerce_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    tracing::debug!(
        "verdict parsed via {}: should_ban={} risk_score={} confidence={}",
        method,
        should_ban,
        risk_score,
        confidence
    );

    Some(Verdict {
        should_ban,
        risk_score,
        confidence,
        reason,
        action: action_for(should_ban, risk_score, confidence),
    })
}

fn coerce_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_json() {
        let verdict = parse_verdict(
            r#"{"should_ban": true, "risk_score": 9, "confidence": 0.9, "reason": "x"}"#,
        )
        .unwrap();
        assert!(verdict.should_ban);
        assert_eq!(verdict.action, BanAction::Ban);
    }

    #[test]
    fn fenced_json_block() {
        let content = "Here is my analysis:\n```json\n{\"should_ban\": false, \"risk_score\": 5, \"confidence\": 0.6, \"reason\": \"ok\"}\n```\nDone.";
        let verdict = parse_verdict(content).unwrap();
        assert!(!verdict.should_ban);
        assert_eq!(verdict.action, BanAction::Monitor);
    }

    #[test]
    fn bare_fence_block() {
        let content = "```\n{\"should_ban\": true, \"risk_score\": 7, \"confidence\": 0.5}\n```";
        let verdict = parse_verdict(content).unwrap();
        assert_eq!(verdict.action, BanAction::Warn);
    }

    #[test]
    fn brace_substring() {
        let content = "The result is {\"should_ban\": false, \"risk_score\": 2, \"confidence\": 0.9, \"reason\": \"fine\"} as requested";
        let verdict = parse_verdict(content).unwrap();
        assert_eq!(verdict.action, BanAction::Skip);
    }

    #[test]
    fn nested_extract_balances_braces() {
        // The stray trailing brace makes the first-{-to-last-} span invalid,
        // forcing the key-anchored brace-balancing path; the verdict object
        // itself contains a nested object to balance over.
        let content = r#"analysis done } see {"should_ban": true, "risk_score": 8, "confidence": 0.85, "meta": {"nested": 1}} trailing }"#;
        let verdict = parse_verdict(content).unwrap();
        assert!(verdict.should_ban);
        assert_eq!(verdict.action, BanAction::Ban);
    }

    #[test]
    fn missing_required_key_is_none() {
        assert!(parse_verdict(r#"{"risk_score": 9, "confidence": 0.9}"#).is_none());
        assert!(parse_verdict("total garbage").is_none());
        assert!(parse_verdict("").is_none());
    }

    #[test]
    fn scores_are_clamped() {
        let verdict = parse_verdict(
            r#"{"should_ban": false, "risk_score": 42, "confidence": 3.5, "reason": ""}"#,
        )
        .unwrap();
        assert_eq!(verdict.risk_score, 10);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn action_thresholds() {
        assert_eq!(action_for(true, 9, 0.9), BanAction::Ban);
        assert_eq!(action_for(true, 8, 0.8), BanAction::Ban);
        // High score, low confidence: warn only.
        assert_eq!(action_for(true, 9, 0.7), BanAction::Warn);
        // should_ban without thresholds: warn.
        assert_eq!(action_for(true, 4, 0.9), BanAction::Warn);
        assert_eq!(action_for(false, 6, 0.2), BanAction::Warn);
        assert_eq!(action_for(false, 4, 0.2), BanAction::Monitor);
        assert_eq!(action_for(false, 3, 0.9), BanAction::Skip);
    }
}
