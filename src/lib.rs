pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{
    FixedClock, MemoryReservationStore, SqliteReservationStore, SystemClock, WeeklyCalendar,
};
pub use config::toml_config::BookingConfig;
pub use core::{engine::BookingEngine, slot_grid::SlotGrid};
pub use utils::error::{BookingError, Result};
