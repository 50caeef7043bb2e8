// Adapters layer: concrete implementations of the domain ports (stores, clock, calendar).

pub mod calendar;
pub mod clock;
pub mod export;
pub mod memory_store;
pub mod sqlite_store;

pub use calendar::{Leave, WeeklyCalendar, WorkingHours};
pub use clock::{FixedClock, SystemClock};
pub use memory_store::MemoryReservationStore;
pub use sqlite_store::{SqliteReservationStore, SqliteStoreOptions};
