use crate::core::rules::BookingRules;
use crate::core::slot_grid::SlotGrid;
use crate::core::{
    AvailabilityQuery, AvailabilityResult, DietitianId, ReservationStore, Result, WorkingCalendar,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;

/// 唯讀的可用時段計算；結果可能在使用者送出預約前就已過期，
/// 衝突由 BookingCoordinator 在提交時解決
pub struct AvailabilityCalculator<S: ?Sized, C: ?Sized> {
    grid: Arc<SlotGrid>,
    rules: BookingRules,
    store: Arc<S>,
    calendar: Arc<C>,
}

impl<S, C> AvailabilityCalculator<S, C>
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

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    pub async fn query(&self, query: &AvailabilityQuery) -> Result<AvailabilityResult> {
        self.available_slots(&query.dietitian_id, query.date, query.now)
            .await
    }

    pub async fn available_slots(
        &self,
        dietitian: &DietitianId,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<AvailabilityResult> {
        let mut result = AvailabilityResult {
            dietitian_id: dietitian.clone(),
            date,
            slots: Vec::new(),
        };

        if date < now.date() {
            tracing::debug!("Date {} is in the past, no availability", date);
            return Ok(result);
        }
        if self.rules.beyond_horizon(date, now) {
            tracing::debug!("Date {} is beyond the booking window", date);
            return Ok(result);
        }

        let day = self
            .rules
            .guard_storage("calendar lookup", self.calendar.day_for(dietitian, date))
            .await?;

        // 對所有日期套用，跨午夜時隔天的早場也會被濾掉
        let cutoff = self.rules.earliest_bookable(now);
        let candidates: Vec<_> = self
            .grid
            .effective_slots(&day)
            .into_iter()
            .filter(|slot| date.and_time(*slot) >= cutoff)
            .collect();

        if candidates.is_empty() {
            return Ok(result);
        }

        let reserved = self
            .rules
            .guard_storage("list_active", self.store.list_active(dietitian, date))
            .await?;

        if let Some(capacity) = self.rules.max_daily_per_dietitian {
            if reserved.len() as u32 >= capacity {
                tracing::debug!("{} is fully booked on {}", dietitian, date);
                return Ok(result);
            }
        }

        result.slots = candidates
            .into_iter()
            .filter(|slot| !reserved.contains(slot))
            .collect();

        tracing::debug!(
            "Availability for {} on {}: {} open, {} reserved",
            dietitian,
            date,
            result.slots.len(),
            reserved.len()
        );

        Ok(result)
    }
}
