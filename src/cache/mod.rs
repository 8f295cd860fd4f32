pub mod single_flight;
pub mod slots;
pub mod tier;
pub mod ttl;

pub use single_flight::SingleFlight;
pub use slots::{SLOT_SECONDS, SlotPlan, SlotSpan, plan};
pub use tier::{CacheTier, SlotState};
pub use ttl::{
    SystemScale, dashboard_ttl, detector_ttl, ip_distribution_ttl, scaled_ttl, ttl_multiplier,
};
