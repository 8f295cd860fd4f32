pub mod audit_store;
pub mod config_store;
pub mod dialect;
pub mod gateway;
pub mod indexes;
pub mod local_cache;
pub mod log_store;
pub mod value;
pub mod writer;

pub use audit_store::{AiScanCounts, AuditStore};
pub use config_store::ConfigStore;
pub use dialect::GatewayDialect;
pub use gateway::{GatewayClient, StoreError, StoreResult};
pub use indexes::ensure_recommended_indexes;
pub use local_cache::LocalCache;
pub use log_store::{LeaderboardEntryRow, LeaderboardSort, LogStore};
pub use value::{SqlParam, SqlRow, SqlValue};
pub use writer::{GatewayWriter, NewRedemption};
