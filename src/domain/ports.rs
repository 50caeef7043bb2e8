use crate::domain::model::{
    BookingRequest, CancelOutcome, DietitianId, InsertOutcome, PatientId, Reservation,
    ReservationEvent, ReservationId,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::BTreeSet;
use tokio::sync::broadcast;

/// 預約的持久化儲存；唯一寫入者為 BookingCoordinator
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// 原子性條件插入：僅當 (dietitian_id, date, slot_time) 沒有未取消的預約時成功
    async fn insert_if_absent(
        &self,
        request: &BookingRequest,
        created_at: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    async fn list_active(&self, dietitian: &DietitianId, date: NaiveDate)
        -> Result<BTreeSet<NaiveTime>>;

    async fn cancel(&self, id: ReservationId, cancelled_at: DateTime<Utc>) -> Result<CancelOutcome>;

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// 病患在 [from, to] 日期區間內未取消的預約數
    async fn count_active_for_patient_between(
        &self,
        patient: &PatientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32>;

    async fn count_active_for_patient(&self, patient: &PatientId, date: NaiveDate) -> Result<u32> {
        self.count_active_for_patient_between(patient, date, date).await
    }

    /// 含已取消的預約，依日期、時間排序
    async fn list_for_dietitian(
        &self,
        dietitian: &DietitianId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>>;
}

/// 預約變動的即時訂閱來源
#[async_trait]
pub trait ReservationEvents: Send + Sync {
    async fn subscribe(&self) -> Result<broadcast::Receiver<ReservationEvent>>;
}

/// 時段區間 [start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingDay {
    Closed,
    Open {
        /// 營養師當天的工作時段；None 代表沿用整個診所時段表
        hours: Option<Vec<TimeRange>>,
        blocked: Vec<TimeRange>,
    },
}

impl WorkingDay {
    pub fn open() -> Self {
        WorkingDay::Open {
            hours: None,
            blocked: Vec::new(),
        }
    }
}

/// 營業日與請假資訊的外部協作者
#[async_trait]
pub trait WorkingCalendar: Send + Sync {
    async fn day_for(&self, dietitian: &DietitianId, date: NaiveDate) -> Result<WorkingDay>;
}

/// 診所當地的牆上時鐘
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}
