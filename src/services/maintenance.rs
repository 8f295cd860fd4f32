//! Hourly local-store maintenance: expired cache rows, stale slots and aged
//! audit/snapshot rows.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cache::CacheTier;
use crate::store::{AuditStore, LocalCache};
use crate::utils::{ScheduledTask, now_ts};

pub struct MaintenanceTask {
    pub cache: Arc<CacheTier>,
    pub local_cache: Arc<LocalCache>,
    pub audit: Arc<AuditStore>,
}

impl ScheduledTask for MaintenanceTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let expired = self.cache.cleanup_expired().await;
            let stale_slots = self.cache.cleanup_stale_slots(now_ts()).await;
            let local = self.local_cache.cleanup_expired().await.unwrap_or(0);
            let audit = self.audit.cleanup().await.unwrap_or(0);

            if expired + stale_slots + local + audit > 0 {
                tracing::info!(
                    expired,
                    stale_slots,
                    local,
                    audit,
                    "local store maintenance completed"
                );
            }
            Ok(())
        })
    }
}
