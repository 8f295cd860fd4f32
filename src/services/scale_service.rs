//! Deployment scale detection.
//!
//! Cache TTLs depend on how big the installation is; this service re-derives
//! the classification periodically from user and log counts and exposes the
//! current value lock-free.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use crate::cache::SystemScale;
use crate::store::LogStore;
use crate::utils::{ScheduledTask, now_ts};

pub struct ScaleService {
    log_store: Arc<LogStore>,
    current: AtomicU8,
    total_users: AtomicI64,
    logs_24h: AtomicI64,
    total_logs: AtomicI64,
    detected_at: AtomicI64,
}

impl ScaleService {
    pub fn new(log_store: Arc<LogStore>) -> Self {
        Self {
            log_store,
            current: AtomicU8::new(SystemScale::Medium.as_u8()),
            total_users: AtomicI64::new(0),
            logs_24h: AtomicI64::new(0),
            total_logs: AtomicI64::new(0),
            detected_at: AtomicI64::new(0),
        }
    }

    pub fn current(&self) -> SystemScale {
        SystemScale::from_u8(self.current.load(Ordering::Relaxed))
    }

    pub fn metrics(&self) -> (i64, i64, i64) {
        (
            self.total_users.load(Ordering::Relaxed),
            self.logs_24h.load(Ordering::Relaxed),
            self.total_logs.load(Ordering::Relaxed),
        )
    }

    pub fn detected_at(&self) -> i64 {
        self.detected_at.load(Ordering::Relaxed)
    }

    pub async fn detect(&self) -> anyhow::Result<SystemScale> {
        let now = now_ts();
        let (users, logs_24h, total_logs) = self.log_store.scale_metrics(now).await?;
        let scale = SystemScale::classify(users, logs_24h, total_logs);

        let previous = self.current();
        self.current.store(scale.as_u8(), Ordering::Relaxed);
        self.total_users.store(users, Ordering::Relaxed);
        self.logs_24h.store(logs_24h, Ordering::Relaxed);
        self.total_logs.store(total_logs, Ordering::Relaxed);
        self.detected_at.store(now, Ordering::Relaxed);

        if previous != scale {
            tracing::info!(
                users,
                logs_24h,
                total_logs,
                "system scale changed: {} -> {}",
                previous.as_str(),
                scale.as_str()
            );
        }
        Ok(scale)
    }
}

impl ScheduledTask for ScaleService {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            self.detect().await?;
            Ok(())
        })
    }
}
