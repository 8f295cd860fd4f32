//! Cross-slot merge for the incremental detector path.
//!
//! Each finalized slot stores, per candidate, enough identity to deduplicate
//! across slots (token/user id sets, IP sets). Merging is: sum request
//! counts, union the sets, re-apply the detector threshold, re-rank and slice
//! to the requested top-K.

use std::collections::{HashMap, HashSet};

use crate::models::gateway::{
    MultiIpToken, MultiIpTokenSlotEntry, MultiIpUser, MultiIpUserSlotEntry, SharedIp,
    SharedIpSlotEntry,
};

pub fn merge_shared_ip_slots(
    slot_lists: Vec<Vec<SharedIpSlotEntry>>,
    min_tokens: i64,
    limit: usize,
) -> Vec<SharedIp> {
    struct Acc {
        request_count: i64,
        token_ids: HashSet<i64>,
        user_ids: HashSet<i64>,
    }

    let mut by_ip: HashMap<String, Acc> = HashMap::new();
    for list in slot_lists {
        for entry in list {
            let acc = by_ip.entry(entry.ip).or_insert_with(|| Acc {
                request_count: 0,
                token_ids: HashSet::new(),
                user_ids: HashSet::new(),
            });
            acc.request_count += entry.request_count;
            acc.token_ids.extend(entry.token_ids);
            acc.user_ids.extend(entry.user_ids);
        }
    }

    let mut merged: Vec<SharedIp> = by_ip
        .into_iter()
        .filter(|(_, acc)| acc.token_ids.len() as i64 >= min_tokens)
        .map(|(ip, acc)| SharedIp {
            ip,
            token_count: acc.token_ids.len() as i64,
            user_count: acc.user_ids.len() as i64,
            request_count: acc.request_count,
            tokens: Vec::new(),
        })
        .collect();
    merged.sort_by(|a, b| {
        b.token_count
            .cmp(&a.token_count)
            .then(b.request_count.cmp(&a.request_count))
            .then(a.ip.cmp(&b.ip))
    });
    merged.truncate(limit);
    merged
}

pub fn merge_multi_ip_token_slots(
    slot_lists: Vec<Vec<MultiIpTokenSlotEntry>>,
    min_ips: i64,
    limit: usize,
) -> Vec<MultiIpToken> {
    struct Acc {
        token_name: String,
        user_id: i64,
        username: String,
        request_count: i64,
        ips: HashSet<String>,
    }

    let mut by_token: HashMap<i64, Acc> = HashMap::new();
    for list in slot_lists {
        for entry in list {
            let acc = by_token.entry(entry.token_id).or_insert_with(|| Acc {
                token_name: String::new(),
                user_id: 0,
                username: String::new(),
                request_count: 0,
                ips: HashSet::new(),
            });
            acc.request_count += entry.request_count;
            acc.ips.extend(entry.ips);
            if acc.token_name.is_empty() {
                acc.token_name = entry.token_name;
            }
            if acc.user_id == 0 {
                acc.user_id = entry.user_id;
            }
            if acc.username.is_empty() {
                acc.username = entry.username;
            }
        }
    }

    let mut merged: Vec<MultiIpToken> = by_token
        .into_iter()
        .filter(|(_, acc)| acc.ips.len() as i64 >= min_ips)
        .map(|(token_id, acc)| MultiIpToken {
            token_id,
            token_name: acc.token_name,
            user_id: acc.user_id,
            username: acc.username,
            ip_count: acc.ips.len() as i64,
            request_count: acc.request_count,
            ips: Vec::new(),
        })
        .collect();
    merged.sort_by(|a, b| {
        b.ip_count
            .cmp(&a.ip_count)
            .then(b.request_count.cmp(&a.request_count))
            .then(a.token_id.cmp(&b.token_id))
    });
    merged.truncate(limit);
    merged
}

pub fn merge_multi_ip_user_slots(
    slot_lists: Vec<Vec<MultiIpUserSlotEntry>>,
    min_ips: i64,
    limit: usize,
) -> Vec<MultiIpUser> {
    struct Acc {
        username: String,
        request_count: i64,
        ips: HashSet<String>,
    }

    let mut by_user: HashMap<i64, Acc> = HashMap::new();
    for list in slot_lists {
        for entry in list {
            let acc = by_user.entry(entry.user_id).or_insert_with(|| Acc {
                username: String::new(),
                request_count: 0,
                ips: HashSet::new(),
            });
            acc.request_count += entry.request_count;
            acc.ips.extend(entry.ips);
            if acc.username.is_empty() {
                acc.username = entry.username;
            }
        }
    }

    let mut merged: Vec<MultiIpUser> = by_user
        .into_iter()
        .filter(|(_, acc)| acc.ips.len() as i64 >= min_ips)
        .map(|(user_id, acc)| MultiIpUser {
            user_id,
            username: acc.username,
            ip_count: acc.ips.len() as i64,
            request_count: acc.request_count,
            top_ips: Vec::new(),
        })
        .collect();
    merged.sort_by(|a, b| {
        b.ip_count
            .cmp(&a.ip_count)
            .then(b.request_count.cmp(&a.request_count))
            .then(a.user_id.cmp(&b.user_id))
    });
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_ip_merge_unions_token_sets_across_slots() {
        // IP A sees token 1 in one slot and token 2 in another; each slot
        // alone reports token_count = 1, the union crosses min_tokens = 2.
        let day1 = vec![SharedIpSlotEntry {
            ip: "203.0.113.7".to_string(),
            request_count: 50,
            token_ids: vec![1],
            user_ids: vec![10],
        }];
        let day2 = vec![SharedIpSlotEntry {
            ip: "203.0.113.7".to_string(),
            request_count: 50,
            token_ids: vec![2],
            user_ids: vec![11],
        }];

        let merged = merge_shared_ip_slots(vec![day1, day2], 2, 50);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip, "203.0.113.7");
        assert_eq!(merged[0].token_count, 2);
        assert_eq!(merged[0].user_count, 2);
        assert_eq!(merged[0].request_count, 100);
    }

    #[test]
    fn shared_ip_merge_filters_below_threshold() {
        let slot = vec![SharedIpSlotEntry {
            ip: "203.0.113.7".to_string(),
            request_count: 5,
            token_ids: vec![1],
            user_ids: vec![1],
        }];
        assert!(merge_shared_ip_slots(vec![slot], 2, 50).is_empty());
    }

    #[test]
    fn multi_ip_token_merge_unions_ip_sets() {
        let a = vec![MultiIpTokenSlotEntry {
            token_id: 5,
            token_name: "tk".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            request_count: 10,
            ips: vec!["1.1.1.1".to_string(), "2.2.2.2".to_string()],
        }];
        let b = vec![MultiIpTokenSlotEntry {
            token_id: 5,
            token_name: String::new(),
            user_id: 1,
            username: String::new(),
            request_count: 20,
            ips: vec!["2.2.2.2".to_string(), "3.3.3.3".to_string()],
        }];

        let merged = merge_multi_ip_token_slots(vec![a, b], 3, 50);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip_count, 3);
        assert_eq!(merged[0].request_count, 30);
        assert_eq!(merged[0].token_name, "tk");
        assert_eq!(merged[0].username, "alice");
    }

    #[test]
    fn multi_ip_user_merge_ranks_and_slices() {
        let slots: Vec<Vec<MultiIpUserSlotEntry>> = (0..3)
            .map(|slot| {
                (1..=4)
                    .map(|uid| MultiIpUserSlotEntry {
                        user_id: uid,
                        username: format!("u{}", uid),
                        request_count: uid * 10,
                        ips: (0..=uid).map(|i| format!("10.0.{}.{}", slot, i)).collect(),
                    })
                    .collect()
            })
            .collect();

        let merged = merge_multi_ip_user_slots(slots, 2, 2);
        assert_eq!(merged.len(), 2);
        // User 4 accumulated the most distinct IPs across slots.
        assert_eq!(merged[0].user_id, 4);
        assert!(merged[0].ip_count >= merged[1].ip_count);
    }
}
