pub mod availability;
pub mod booking;
pub mod engine;
pub mod feed;
pub mod rules;
pub mod slot_grid;

pub use crate::domain::model::{
    AvailabilityQuery, AvailabilityResult, BookingRequest, CancelOutcome, DietitianId,
    InsertOutcome, PatientId, Reservation, ReservationEvent, ReservationId, ReservationStatus,
};
pub use crate::domain::ports::{
    Clock, ReservationEvents, ReservationStore, TimeRange, WorkingCalendar, WorkingDay,
};
pub use crate::utils::error::Result;
