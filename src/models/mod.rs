pub mod behavior;
pub mod gateway;

pub use behavior::*;
pub use gateway::*;
