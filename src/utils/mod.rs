pub mod error;
pub mod jwt;
pub mod scheduled_executor;
pub mod time;

pub use error::{ApiError, ApiResult};
pub use jwt::JwtUtil;
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
pub use time::{
    DASHBOARD_WINDOWS, IP_DIST_WINDOWS, MODEL_STATUS_WINDOWS, RISK_WINDOWS, Window, now_ts,
    parse_window,
};
