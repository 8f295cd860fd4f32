//! Geographic distribution of request traffic, for the dashboard map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::cache::{CacheTier, ip_distribution_ttl};
use crate::geo::GeoService;
use crate::store::LogStore;
use crate::utils::{ApiError, ApiResult, Window, now_ts};

const MAX_IPS_SCANNED: i64 = 5000;
const TOP_IPS_RETURNED: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CountryStat {
    pub country: String,
    pub country_code: String,
    pub ip_count: i64,
    pub request_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TopIpStat {
    pub ip: String,
    pub country: String,
    pub city: String,
    pub request_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IpDistribution {
    pub window: String,
    pub total_ips: i64,
    pub total_requests: i64,
    pub geo_available: bool,
    pub countries: Vec<CountryStat>,
    pub top_ips: Vec<TopIpStat>,
}

pub struct IpDistributionService {
    log_store: Arc<LogStore>,
    cache: Arc<CacheTier>,
    geo: Arc<GeoService>,
}

impl IpDistributionService {
    pub fn new(log_store: Arc<LogStore>, cache: Arc<CacheTier>, geo: Arc<GeoService>) -> Self {
        Self { log_store, cache, geo }
    }

    pub async fn distribution(&self, window: Window, use_cache: bool) -> ApiResult<IpDistribution> {
        let key = format!("ip_dist:{}", window.as_str());
        if !use_cache {
            self.cache.delete(&key).await;
        }
        let ttl = ip_distribution_ttl(window);
        let value = self
            .cache
            .get_or_compute(&key, ttl, || async {
                let distribution = self.compute(window).await?;
                serde_json::to_value(&distribution)
                    .map_err(|e| ApiError::internal_error(e.to_string()))
            })
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::internal_error(e.to_string()))
    }

    async fn compute(&self, window: Window) -> ApiResult<IpDistribution> {
        let end = now_ts();
        let rows = self
            .log_store
            .ip_traffic(end - window.seconds(), end, MAX_IPS_SCANNED)
            .await?;

        let total_ips = rows.len() as i64;
        let total_requests: i64 = rows.iter().map(|r| r.request_count).sum();

        let ips: Vec<String> = rows.iter().map(|r| r.ip.clone()).collect();
        let geo = self.geo.lookup_batch(&ips).await;

        let mut by_country: HashMap<String, CountryStat> = HashMap::new();
        let mut top_ips = Vec::with_capacity(TOP_IPS_RETURNED);
        for row in &rows {
            let info = geo.get(&row.ip);
            let (country, country_code, city) = match info {
                Some(i) if i.success => {
                    (i.country.clone(), i.country_code.clone(), i.city.clone())
                }
                _ => ("Unknown".to_string(), "??".to_string(), String::new()),
            };

            let stat = by_country
                .entry(country_code.clone())
                .or_insert_with(|| CountryStat {
                    country: country.clone(),
                    country_code: country_code.clone(),
                    ip_count: 0,
                    request_count: 0,
                    user_count: 0,
                });
            stat.ip_count += 1;
            stat.request_count += row.request_count;
            stat.user_count += row.user_count;

            if top_ips.len() < TOP_IPS_RETURNED {
                top_ips.push(TopIpStat {
                    ip: row.ip.clone(),
                    country,
                    city,
                    request_count: row.request_count,
                    user_count: row.user_count,
                });
            }
        }

        let mut countries: Vec<CountryStat> = by_country.into_values().collect();
        countries.sort_by(|a, b| {
            b.request_count
                .cmp(&a.request_count)
                .then(a.country_code.cmp(&b.country_code))
        });

        Ok(IpDistribution {
            window: window.as_str().to_string(),
            total_ips,
            total_requests,
            geo_available: self.geo.is_available(),
            countries,
            top_ips,
        })
    }
}
