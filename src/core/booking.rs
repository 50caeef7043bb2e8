use crate::core::rules::BookingRules;
use crate::core::slot_grid::SlotGrid;
use crate::core::{
    BookingRequest, CancelOutcome, InsertOutcome, Reservation, ReservationId, ReservationStore,
    Result, WorkingCalendar,
};
use crate::utils::error::BookingError;
use crate::utils::validation::Validate;
use chrono::{NaiveDateTime, Utc};
use std::sync::Arc;

/// 預約的唯一寫入者。提交前重新驗證，再交由儲存層做原子性條件插入；
/// 插入結果是唯一性的最終依據，與先前讀到的可用時段無關
pub struct BookingCoordinator<S: ?Sized, C: ?Sized> {
    grid: Arc<SlotGrid>,
    rules: BookingRules,
    store: Arc<S>,
    calendar: Arc<C>,
}

impl<S, C> BookingCoordinator<S, C>
where
    S: ReservationStore + ?Sized,
    C: WorkingCalendar + ?Sized,
{
    pub fn new(grid: Arc<SlotGrid>, rules: BookingRules, store: Arc<S>, calendar: Arc<C>) -> Self {
        Self {
            grid,
            rules,
            store,
            calendar,
        }
    }

    pub async fn book(&self, request: &BookingRequest, now: NaiveDateTime) -> Result<Reservation> {
        request.validate()?;

        if !self.grid.contains(request.slot_time) {
            return Err(BookingError::InvalidSlot {
                date: request.date,
                time: request.slot_time,
            });
        }

        if request.date < now.date() || request.starts_at() < self.rules.earliest_bookable(now) {
            return Err(BookingError::PastSlot {
                date: request.date,
                time: request.slot_time,
                buffer_minutes: self.rules.buffer.num_minutes(),
            });
        }

        if self.rules.beyond_horizon(request.date, now) {
            return Err(BookingError::OutsideBookingWindow {
                date: request.date,
                max_days: self.rules.max_advance_days.unwrap_or_default(),
            });
        }

        let day = self
            .rules
            .guard_storage(
                "calendar lookup",
                self.calendar.day_for(&request.dietitian_id, request.date),
            )
            .await?;
        if !self.grid.effective_slots(&day).contains(&request.slot_time) {
            return Err(BookingError::InvalidSlot {
                date: request.date,
                time: request.slot_time,
            });
        }

        if let Some(limit) = self.rules.max_daily_per_patient {
            let held = self
                .rules
                .guard_storage(
                    "count_active_for_patient",
                    self.store
                        .count_active_for_patient(&request.patient_id, request.date),
                )
                .await?;
            if held >= limit {
                return Err(BookingError::PatientLimitReached {
                    patient: request.patient_id.to_string(),
                    date: request.date,
                    limit,
                });
            }
        }

        if let Some(limit) = self.rules.max_weekly_per_patient {
            let (week_start, week_end) = BookingRules::week_of(request.date);
            let held = self
                .rules
                .guard_storage(
                    "count_active_for_patient_between",
                    self.store.count_active_for_patient_between(
                        &request.patient_id,
                        week_start,
                        week_end,
                    ),
                )
                .await?;
            if held >= limit {
                return Err(BookingError::PatientWeeklyLimitReached {
                    patient: request.patient_id.to_string(),
                    week_start,
                    limit,
                });
            }
        }

        if let Some(capacity) = self.rules.max_daily_per_dietitian {
            let booked = self
                .rules
                .guard_storage(
                    "list_active",
                    self.store.list_active(&request.dietitian_id, request.date),
                )
                .await?;
            if booked.len() as u32 >= capacity {
                return Err(BookingError::DietitianCapacityReached {
                    dietitian: request.dietitian_id.to_string(),
                    date: request.date,
                    capacity,
                });
            }
        }

        let outcome = self
            .rules
            .guard_storage(
                "insert_if_absent",
                self.store.insert_if_absent(request, Utc::now()),
            )
            .await?;

        match outcome {
            InsertOutcome::Inserted(reservation) => {
                tracing::info!(
                    "✅ Booked {} {} with {} for {} ({})",
                    reservation.date,
                    reservation.slot_time.format("%H:%M"),
                    reservation.dietitian_id,
                    reservation.patient_id,
                    reservation.id
                );
                Ok(reservation)
            }
            InsertOutcome::Conflict => {
                tracing::warn!(
                    "⚠️ Slot {} {} with {} already taken, rejecting {}",
                    request.date,
                    request.slot_time.format("%H:%M"),
                    request.dietitian_id,
                    request.patient_id
                );
                Err(BookingError::Conflict {
                    dietitian: request.dietitian_id.to_string(),
                    date: request.date,
                    time: request.slot_time,
                })
            }
        }
    }

    /// 取消預約；重複取消回傳已存的紀錄
    pub async fn cancel(&self, id: ReservationId, now: NaiveDateTime) -> Result<Reservation> {
        let existing = self
            .rules
            .guard_storage("get", self.store.get(id))
            .await?
            .ok_or_else(|| BookingError::ReservationNotFound { id: id.to_string() })?;

        if !existing.status.is_active() {
            tracing::debug!("Reservation {} already cancelled", id);
            return Ok(existing);
        }

        if existing.starts_at() - now < self.rules.min_cancel_notice {
            return Err(BookingError::CancellationTooLate {
                id: id.to_string(),
                notice_minutes: self.rules.min_cancel_notice.num_minutes(),
            });
        }

        let outcome = self
            .rules
            .guard_storage("cancel", self.store.cancel(id, Utc::now()))
            .await?;

        match outcome {
            CancelOutcome::Cancelled(reservation) => {
                tracing::info!(
                    "🗑️ Cancelled {} ({} {} with {})",
                    reservation.id,
                    reservation.date,
                    reservation.slot_time.format("%H:%M"),
                    reservation.dietitian_id
                );
                Ok(reservation)
            }
            CancelOutcome::AlreadyCancelled(reservation) => Ok(reservation),
            CancelOutcome::NotFound => Err(BookingError::ReservationNotFound { id: id.to_string() }),
        }
    }
}
