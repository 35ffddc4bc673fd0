pub mod bus;
pub mod clock;
pub mod gate;
pub mod quotes;
pub mod reconcile;
pub mod rows;
pub mod subscription;
pub mod surface;
pub mod types;

pub const CADENCE_FAST_TICKS: u32 = 3;
pub const CADENCE_WATCHLIST_TICKS: u32 = 5;
pub const CADENCE_HOURLY_TICKS: u32 = 60;
