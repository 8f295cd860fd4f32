//! Per-model success-rate heat-map over sliding windows.
//!
//! Each window is tiled into a fixed number of slots; a slot is green when
//! its success rate is >= 95 % (or it saw no traffic), yellow at >= 80 %,
//! red below. The batched form buckets many models in one query.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::cache::CacheTier;
use crate::store::LogStore;
use crate::utils::{ApiError, ApiResult, Window, now_ts};

const CACHE_TTL_SHORT: u64 = 30;

/// `(num_slots, slot_seconds)` per supported window.
pub fn window_slots(window: Window) -> (i64, i64) {
    match window {
        Window::H1 => (60, 60),
        Window::H6 => (24, 900),
        Window::H12 => (24, 1800),
        _ => (24, 3600),
    }
}

pub fn status_color(success_rate: f64, total_requests: i64) -> &'static str {
    if total_requests == 0 || success_rate >= 95.0 {
        "green"
    } else if success_rate >= 80.0 {
        "yellow"
    } else {
        "red"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SlotStatus {
    pub slot: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub total_requests: i64,
    pub success_count: i64,
    pub success_rate: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelStatus {
    pub model_name: String,
    pub time_window: String,
    pub total_requests: i64,
    pub success_count: i64,
    pub success_rate: f64,
    pub current_status: String,
    pub slot_data: Vec<SlotStatus>,
}

pub struct ModelStatusService {
    log_store: Arc<LogStore>,
    cache: Arc<CacheTier>,
}

impl ModelStatusService {
    pub fn new(log_store: Arc<LogStore>, cache: Arc<CacheTier>) -> Self {
        Self { log_store, cache }
    }

    pub async fn model_status(
        &self,
        model_name: &str,
        window: Window,
        use_cache: bool,
    ) -> ApiResult<ModelStatus> {
        let mut statuses = self
            .batch_status(std::slice::from_ref(&model_name.to_string()), window, use_cache)
            .await?;
        statuses
            .pop()
            .ok_or_else(|| ApiError::not_found(format!("model {} not found", model_name)))
    }

    /// One query buckets every requested model; cache is per (model, window).
    pub async fn batch_status(
        &self,
        models: &[String],
        window: Window,
        use_cache: bool,
    ) -> ApiResult<Vec<ModelStatus>> {
        let mut results: Vec<Option<ModelStatus>> = vec![None; models.len()];
        let mut to_query: Vec<(usize, String)> = Vec::new();

        for (idx, model) in models.iter().enumerate() {
            let key = format!("model_status:{}:{}", model, window.as_str());
            if use_cache
                && let Some(value) = self.cache.get(&key).await
                && let Ok(status) = serde_json::from_value::<ModelStatus>(value)
            {
                results[idx] = Some(status);
            } else {
                to_query.push((idx, model.clone()));
            }
        }

        if !to_query.is_empty() {
            let names: Vec<String> = to_query.iter().map(|(_, m)| m.clone()).collect();
            let computed = self.compute_batch(&names, window).await?;
            for (idx, model) in to_query {
                let status = computed
                    .get(&model)
                    .cloned()
                    .unwrap_or_else(|| empty_status(&model, window));
                let key = format!("model_status:{}:{}", model, window.as_str());
                if let Ok(value) = serde_json::to_value(&status) {
                    self.cache.set(&key, &value, CACHE_TTL_SHORT).await;
                }
                results[idx] = Some(status);
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn compute_batch(
        &self,
        models: &[String],
        window: Window,
    ) -> ApiResult<HashMap<String, ModelStatus>> {
        let (num_slots, slot_seconds) = window_slots(window);
        let now = now_ts();
        let window_start = now - num_slots * slot_seconds;

        let buckets = self
            .log_store
            .model_status_buckets(models, window_start, slot_seconds, now)
            .await?;

        let mut per_model: HashMap<String, Vec<(i64, i64, i64)>> = HashMap::new();
        for bucket in buckets {
            per_model
                .entry(bucket.model_name)
                .or_default()
                .push((bucket.slot_idx, bucket.total, bucket.success));
        }

        let mut out = HashMap::with_capacity(models.len());
        for model in models {
            let counts = per_model.remove(model).unwrap_or_default();
            out.insert(
                model.clone(),
                build_status(model, window, window_start, num_slots, slot_seconds, &counts),
            );
        }
        Ok(out)
    }

    /// Recently seen models, for the status page's model picker.
    pub async fn available_models(&self) -> ApiResult<Vec<String>> {
        let key = "model_status:available";
        if let Some(value) = self.cache.get(key).await
            && let Ok(models) = serde_json::from_value::<Vec<String>>(value)
        {
            return Ok(models);
        }
        let start = now_ts() - Window::H24.seconds();
        let models: Vec<String> = self
            .log_store
            .recent_models(start, 100)
            .await?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        if let Ok(value) = serde_json::to_value(&models) {
            self.cache.set(key, &value, 300).await;
        }
        Ok(models)
    }
}

fn empty_status(model: &str, window: Window) -> ModelStatus {
    let (num_slots, slot_seconds) = window_slots(window);
    let now = now_ts();
    let window_start = now - num_slots * slot_seconds;
    build_status(model, window, window_start, num_slots, slot_seconds, &[])
}

fn build_status(
    model: &str,
    window: Window,
    window_start: i64,
    num_slots: i64,
    slot_seconds: i64,
    counts: &[(i64, i64, i64)],
) -> ModelStatus {
    let by_slot: HashMap<i64, (i64, i64)> = counts
        .iter()
        .filter(|(idx, _, _)| (0..num_slots).contains(idx))
        .map(|(idx, total, success)| (*idx, (*total, *success)))
        .collect();

    let mut slot_data = Vec::with_capacity(num_slots as usize);
    let mut total_requests = 0i64;
    let mut success_count = 0i64;
    for slot in 0..num_slots {
        let (total, success) = by_slot.get(&slot).copied().unwrap_or((0, 0));
        total_requests += total;
        success_count += success;
        let rate = if total > 0 { success as f64 / total as f64 * 100.0 } else { 100.0 };
        let rate = (rate * 100.0).round() / 100.0;
        slot_data.push(SlotStatus {
            slot,
            start_time: window_start + slot * slot_seconds,
            end_time: window_start + (slot + 1) * slot_seconds,
            total_requests: total,
            success_count: success,
            success_rate: rate,
            status: status_color(rate, total).to_string(),
        });
    }

    let overall_rate = if total_requests > 0 {
        success_count as f64 / total_requests as f64 * 100.0
    } else {
        100.0
    };
    let overall_rate = (overall_rate * 100.0).round() / 100.0;

    ModelStatus {
        model_name: model.to_string(),
        time_window: window.as_str().to_string(),
        total_requests,
        success_count,
        success_rate: overall_rate,
        current_status: status_color(overall_rate, total_requests).to_string(),
        slot_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_slot_shapes() {
        assert_eq!(window_slots(Window::H1), (60, 60));
        assert_eq!(window_slots(Window::H6), (24, 900));
        assert_eq!(window_slots(Window::H12), (24, 1800));
        assert_eq!(window_slots(Window::H24), (24, 3600));
    }

    #[test]
    fn color_thresholds() {
        assert_eq!(status_color(100.0, 10), "green");
        assert_eq!(status_color(95.0, 10), "green");
        assert_eq!(status_color(94.99, 10), "yellow");
        assert_eq!(status_color(80.0, 10), "yellow");
        assert_eq!(status_color(79.9, 10), "red");
        // No traffic is healthy, not red.
        assert_eq!(status_color(0.0, 0), "green");
    }

    #[test]
    fn build_status_fills_empty_slots_green() {
        let status = build_status("gpt-4o", Window::H1, 0, 60, 60, &[(2, 10, 8), (5, 4, 4)]);
        assert_eq!(status.slot_data.len(), 60);
        assert_eq!(status.total_requests, 14);
        assert_eq!(status.success_count, 12);

        let busy = &status.slot_data[2];
        assert_eq!(busy.total_requests, 10);
        assert_eq!(busy.success_rate, 80.0);
        assert_eq!(busy.status, "yellow");

        let idle = &status.slot_data[0];
        assert_eq!(idle.total_requests, 0);
        assert_eq!(idle.success_rate, 100.0);
        assert_eq!(idle.status, "green");

        // Overall: 12/14 = 85.71 -> yellow.
        assert_eq!(status.current_status, "yellow");
    }

    #[test]
    fn out_of_range_slots_are_dropped() {
        let status = build_status("m", Window::H1, 0, 60, 60, &[(-1, 5, 5), (60, 5, 5), (0, 2, 2)]);
        assert_eq!(status.total_requests, 2);
    }
}
