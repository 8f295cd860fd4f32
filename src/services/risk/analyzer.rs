//! Pure per-user behavior analysis over an ordered request sequence.
//!
//! Everything here is a function of the fetched rows plus geo lookups, so the
//! analyzer is directly testable without a database.

use std::collections::HashMap;

use crate::geo::{IpGeoInfo, is_dual_stack_pair};
use crate::models::behavior::{
    BehaviorSummary, IpSwitchAnalysis, RiskFlag, TopGroup, TopIp, TopModel,
};
use crate::models::gateway::{LogRow, UserIpUsage};

const RAPID_SWITCH_SECONDS: i64 = 60;
const MANY_IPS_THRESHOLD: i64 = 10;
const RAPID_SWITCH_FLAG_THRESHOLD: i64 = 3;
const HOPPING_AVG_DURATION_SECONDS: f64 = 30.0;
const HOPPING_REAL_SWITCH_THRESHOLD: i64 = 3;

pub fn summarize(rows: &[LogRow]) -> BehaviorSummary {
    let mut models = std::collections::HashSet::new();
    let mut tokens = std::collections::HashSet::new();
    let mut ips = std::collections::HashSet::new();
    for row in rows {
        if !row.model_name.is_empty() {
            models.insert(row.model_name.as_str());
        }
        if row.token_id > 0 {
            tokens.insert(row.token_id);
        }
        if !row.ip.is_empty() {
            ips.insert(row.ip.as_str());
        }
    }
    BehaviorSummary {
        total_requests: rows.len() as i64,
        unique_models: models.len() as i64,
        unique_tokens: tokens.len() as i64,
        unique_ips: ips.len() as i64,
    }
}

/// Walk the sequence and classify every IP transition.
///
/// Rows without a recorded IP do not participate in the walk. A transition is
/// a *switch* when consecutive recorded IPs differ; a *dual-stack switch*
/// when the two IPs sit on opposite IP versions at the same location key; a
/// *rapid switch* when a real (non-dual-stack) switch happens within 60 s.
pub fn analyze_ip_switches(
    rows: &[LogRow],
    geo: &HashMap<String, IpGeoInfo>,
) -> IpSwitchAnalysis {
    let sequence: Vec<(&str, i64)> = rows
        .iter()
        .filter(|r| !r.ip.is_empty())
        .map(|r| (r.ip.as_str(), r.created_at))
        .collect();

    let mut analysis = IpSwitchAnalysis::default();
    if sequence.len() < 2 {
        return analysis;
    }

    let mut run_start = sequence[0].1;
    let mut run_durations: Vec<i64> = Vec::new();
    let mut last_real_switch_at: Option<i64> = None;
    let mut min_real_interval: Option<i64> = None;

    for pair in sequence.windows(2) {
        let (prev_ip, prev_at) = pair[0];
        let (cur_ip, cur_at) = pair[1];
        if prev_ip == cur_ip {
            continue;
        }

        analysis.switch_count += 1;
        run_durations.push(cur_at - run_start);
        run_start = cur_at;

        let dual_stack = match (geo.get(prev_ip), geo.get(cur_ip)) {
            (Some(a), Some(b)) => is_dual_stack_pair(a, b),
            _ => false,
        };
        if dual_stack {
            analysis.dual_stack_switches += 1;
            continue;
        }

        analysis.real_switch_count += 1;
        if cur_at - prev_at < RAPID_SWITCH_SECONDS {
            analysis.rapid_switch_count += 1;
        }
        if let Some(previous_at) = last_real_switch_at {
            let interval = cur_at - previous_at;
            min_real_interval =
                Some(min_real_interval.map_or(interval, |current| current.min(interval)));
        }
        last_real_switch_at = Some(cur_at);
    }

    if !run_durations.is_empty() {
        let total: i64 = run_durations.iter().sum();
        analysis.avg_ip_duration =
            ((total as f64 / run_durations.len() as f64) * 100.0).round() / 100.0;
    }
    analysis.min_switch_interval = min_real_interval.unwrap_or(0);
    analysis
}

pub fn derive_flags(summary: &BehaviorSummary, switches: &IpSwitchAnalysis) -> Vec<RiskFlag> {
    let mut flags = Vec::new();
    if summary.unique_ips >= MANY_IPS_THRESHOLD {
        flags.push(RiskFlag::ManyIps);
    }
    if switches.rapid_switch_count >= RAPID_SWITCH_FLAG_THRESHOLD {
        flags.push(RiskFlag::IpRapidSwitch);
    }
    if switches.avg_ip_duration < HOPPING_AVG_DURATION_SECONDS
        && switches.real_switch_count >= HOPPING_REAL_SWITCH_THRESHOLD
    {
        flags.push(RiskFlag::IpHopping);
    }
    flags
}

pub fn top_ips(rows: &[LogRow], k: usize) -> Vec<TopIp> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        if !row.ip.is_empty() {
            *counts.entry(row.ip.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<TopIp> = counts
        .into_iter()
        .map(|(ip, requests)| TopIp { ip: ip.to_string(), requests })
        .collect();
    out.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.ip.cmp(&b.ip)));
    out.truncate(k);
    out
}

pub fn top_models(rows: &[LogRow], k: usize) -> Vec<TopModel> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        if !row.model_name.is_empty() {
            *counts.entry(row.model_name.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<TopModel> = counts
        .into_iter()
        .map(|(model, requests)| TopModel { model_name: model.to_string(), requests })
        .collect();
    out.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.model_name.cmp(&b.model_name)));
    out.truncate(k);
    out
}

pub fn top_groups(rows: &[LogRow], k: usize) -> Vec<TopGroup> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        let group = if row.group.is_empty() { "default" } else { row.group.as_str() };
        *counts.entry(group).or_default() += 1;
    }
    let mut out: Vec<TopGroup> = counts
        .into_iter()
        .map(|(group, requests)| TopGroup { group_name: group.to_string(), requests })
        .collect();
    out.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.group_name.cmp(&b.group_name)));
    out.truncate(k);
    out
}

/// Per-IP usage detail built from the already-fetched sequence.
pub fn ip_usage(rows: &[LogRow], k: usize) -> Vec<UserIpUsage> {
    let mut by_ip: HashMap<&str, UserIpUsage> = HashMap::new();
    for row in rows {
        if row.ip.is_empty() {
            continue;
        }
        let entry = by_ip.entry(row.ip.as_str()).or_insert_with(|| UserIpUsage {
            ip: row.ip.clone(),
            request_count: 0,
            first_seen: row.created_at,
            last_seen: row.created_at,
        });
        entry.request_count += 1;
        entry.first_seen = entry.first_seen.min(row.created_at);
        entry.last_seen = entry.last_seen.max(row.created_at);
    }
    let mut out: Vec<UserIpUsage> = by_ip.into_values().collect();
    out.sort_by(|a, b| b.request_count.cmp(&a.request_count).then(a.ip.cmp(&b.ip)));
    out.truncate(k);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::geo_record;

    fn row(created_at: i64, ip: &str) -> LogRow {
        LogRow {
            id: created_at,
            created_at,
            log_type: 2,
            user_id: 42,
            token_id: 1,
            model_name: "gpt-4o".to_string(),
            group: "default".to_string(),
            ip: ip.to_string(),
            quota: 1,
            prompt_tokens: 10,
            completion_tokens: 5,
            use_time_ms: 100,
        }
    }

    fn dual_stack_geo() -> HashMap<String, IpGeoInfo> {
        let mut geo = HashMap::new();
        geo.insert("1.2.3.4".to_string(), geo_record("1.2.3.4", "AS100", "Berlin", "DE"));
        geo.insert("2001:db8::1".to_string(), geo_record("2001:db8::1", "AS100", "Berlin", "DE"));
        geo.insert("9.9.9.9".to_string(), geo_record("9.9.9.9", "AS999", "Zurich", "CH"));
        geo
    }

    #[test]
    fn dual_stack_user_is_not_flagged() {
        // v4/v6 flapping at the same location, then one real move much later.
        let rows = vec![
            row(0, "1.2.3.4"),
            row(5, "2001:db8::1"),
            row(10, "1.2.3.4"),
            row(15, "2001:db8::1"),
            row(9999, "9.9.9.9"),
        ];
        let geo = dual_stack_geo();

        let analysis = analyze_ip_switches(&rows, &geo);
        assert_eq!(analysis.switch_count, 4);
        assert_eq!(analysis.dual_stack_switches, 3);
        assert_eq!(analysis.real_switch_count, 1);
        assert_eq!(analysis.rapid_switch_count, 0);
        // Runs of 5, 5, 5 and 9984 seconds.
        assert!((analysis.avg_ip_duration - 2499.75).abs() < 0.01);
        // A single real switch has no interval to a predecessor.
        assert_eq!(analysis.min_switch_interval, 0);

        let summary = summarize(&rows);
        let flags = derive_flags(&summary, &analysis);
        assert!(!flags.contains(&RiskFlag::IpRapidSwitch));
        assert!(!flags.contains(&RiskFlag::IpHopping));
        assert!(flags.is_empty());
    }

    #[test]
    fn switch_count_invariant_holds() {
        let rows = vec![
            row(0, "1.2.3.4"),
            row(3, "9.9.9.9"),
            row(6, "2001:db8::1"),
            row(9, "1.2.3.4"),
        ];
        let analysis = analyze_ip_switches(&rows, &dual_stack_geo());
        assert_eq!(
            analysis.switch_count,
            analysis.real_switch_count + analysis.dual_stack_switches
        );
        assert!(analysis.rapid_switch_count <= analysis.real_switch_count);
    }

    #[test]
    fn rapid_hopping_is_flagged() {
        let mut rows = Vec::new();
        for i in 0..6 {
            rows.push(row(i * 10, if i % 2 == 0 { "9.9.9.9" } else { "8.8.8.8" }));
        }
        // Unknown geo: every switch is real.
        let analysis = analyze_ip_switches(&rows, &HashMap::new());
        assert_eq!(analysis.real_switch_count, 5);
        assert_eq!(analysis.rapid_switch_count, 5);
        assert!(analysis.avg_ip_duration < 30.0);
        assert_eq!(analysis.min_switch_interval, 10);

        let flags = derive_flags(&summarize(&rows), &analysis);
        assert!(flags.contains(&RiskFlag::IpRapidSwitch));
        assert!(flags.contains(&RiskFlag::IpHopping));
    }

    #[test]
    fn many_ips_threshold_is_exact() {
        let mut rows: Vec<LogRow> = (0..10).map(|i| row(i, &format!("203.0.113.{}", i))).collect();
        let summary = summarize(&rows);
        assert_eq!(summary.unique_ips, 10);
        assert!(derive_flags(&summary, &IpSwitchAnalysis::default()).contains(&RiskFlag::ManyIps));

        rows.pop();
        let summary = summarize(&rows);
        assert_eq!(summary.unique_ips, 9);
        assert!(!derive_flags(&summary, &IpSwitchAnalysis::default()).contains(&RiskFlag::ManyIps));
    }

    #[test]
    fn rows_without_ip_do_not_participate() {
        let rows = vec![row(0, "1.1.1.1"), row(5, ""), row(10, "1.1.1.1")];
        let analysis = analyze_ip_switches(&rows, &HashMap::new());
        assert_eq!(analysis.switch_count, 0);
    }

    #[test]
    fn top_k_ordering_is_stable() {
        let rows = vec![row(0, "b"), row(1, "a"), row(2, "a"), row(3, "c"), row(4, "c")];
        let top = top_ips(&rows, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].ip, "a");
        assert_eq!(top[1].ip, "c");
    }

    #[test]
    fn ip_usage_tracks_first_and_last_seen() {
        let rows = vec![row(5, "1.1.1.1"), row(9, "1.1.1.1"), row(7, "2.2.2.2")];
        let usage = ip_usage(&rows, 10);
        let first = usage.iter().find(|u| u.ip == "1.1.1.1").unwrap();
        assert_eq!(first.request_count, 2);
        assert_eq!(first.first_seen, 5);
        assert_eq!(first.last_seen, 9);
    }
}
