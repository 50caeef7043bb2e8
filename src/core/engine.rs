use crate::core::availability::AvailabilityCalculator;
use crate::core::booking::BookingCoordinator;
use crate::core::feed::{AvailabilityFeed, FeedHandle, FeedPolicy};
use crate::core::rules::BookingRules;
use crate::core::slot_grid::SlotGrid;
use crate::core::{
    AvailabilityResult, BookingRequest, Clock, DietitianId, Reservation, ReservationEvents,
    ReservationId, ReservationStore, Result, WorkingCalendar,
};
use crate::utils::retry::RetryPolicy;
use chrono::NaiveDate;
use std::sync::Arc;

/// 可用時段查詢與預約提交的進入點，供 CLI 與 API 層使用
pub struct BookingEngine<S: ?Sized, C: ?Sized> {
    calculator: Arc<AvailabilityCalculator<S, C>>,
    coordinator: BookingCoordinator<S, C>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<S, C> BookingEngine<S, C>
where
    S: ReservationStore + ?Sized + 'static,
    C: WorkingCalendar + ?Sized + 'static,
{
    pub fn new(
        grid: SlotGrid,
        rules: BookingRules,
        store: Arc<S>,
        calendar: Arc<C>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let grid = Arc::new(grid);
        let calculator = Arc::new(AvailabilityCalculator::new(
            grid.clone(),
            rules.clone(),
            store.clone(),
            calendar.clone(),
        ));
        let coordinator = BookingCoordinator::new(grid, rules, store.clone(), calendar);

        Self {
            calculator,
            coordinator,
            store,
            clock,
            retry: RetryPolicy::none(),
        }
    }

    /// 讀取操作與取消在儲存層暫時無法使用時依此策略重試
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn calculator(&self) -> Arc<AvailabilityCalculator<S, C>> {
        self.calculator.clone()
    }

    pub async fn available_slots(
        &self,
        dietitian: &DietitianId,
        date: NaiveDate,
    ) -> Result<AvailabilityResult> {
        self.retry
            .retry(move |_| {
                self.calculator
                    .available_slots(dietitian, date, self.clock.now())
            })
            .await
    }

    /// 不自動重試：逾時的插入可能已經提交，重送會得到與自己衝突的結果
    pub async fn book(&self, request: &BookingRequest) -> Result<Reservation> {
        self.coordinator.book(request, self.clock.now()).await
    }

    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        self.retry
            .retry(move |_| self.coordinator.cancel(id, self.clock.now()))
            .await
    }

    pub async fn reservations(
        &self,
        dietitian: &DietitianId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>> {
        self.retry
            .retry(move |_| self.store.list_for_dietitian(dietitian, from, to))
            .await
    }

    pub fn watch(
        &self,
        dietitian: DietitianId,
        date: NaiveDate,
        events: Option<Arc<dyn ReservationEvents>>,
        policy: FeedPolicy,
    ) -> FeedHandle {
        AvailabilityFeed::new(
            self.calculator.clone(),
            events,
            self.clock.clone(),
            dietitian,
            date,
            policy,
        )
        .spawn()
    }
}
