use crate::utils::error::{BookingError, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use std::future::Future;

/// 可用時段計算與預約共用的業務規則
#[derive(Debug, Clone)]
pub struct BookingRules {
    /// 當日時段的最短準備時間
    pub buffer: Duration,
    /// 最多可預約幾天後的日期
    pub max_advance_days: Option<u32>,
    pub max_daily_per_patient: Option<u32>,
    /// 病患每週（星期一起算）最多幾筆預約
    pub max_weekly_per_patient: Option<u32>,
    /// 營養師每天最多接幾筆預約
    pub max_daily_per_dietitian: Option<u32>,
    pub min_cancel_notice: Duration,
    /// 單次儲存層呼叫的逾時
    pub storage_timeout: Option<std::time::Duration>,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            buffer: Duration::minutes(30),
            max_advance_days: Some(90),
            max_daily_per_patient: Some(3),
            max_weekly_per_patient: Some(7),
            max_daily_per_dietitian: Some(12),
            min_cancel_notice: Duration::hours(2),
            storage_timeout: Some(std::time::Duration::from_secs(5)),
        }
    }
}

impl BookingRules {
    /// 早於此時間開始的時段不可預約。
    /// 以完整日期時間比較，深夜時緩衝會延伸到隔天凌晨的時段，不只限於當日
    pub fn earliest_bookable(&self, now: NaiveDateTime) -> NaiveDateTime {
        now + self.buffer
    }

    pub fn beyond_horizon(&self, date: NaiveDate, now: NaiveDateTime) -> bool {
        match self.max_advance_days {
            Some(days) => (date - now.date()).num_days() > days as i64,
            None => false,
        }
    }

    /// date 所在週的星期一與星期日
    pub fn week_of(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
        (monday, monday + Duration::days(6))
    }

    /// 將儲存層呼叫包上逾時；逾時一律視為可重試的 StorageUnavailable
    pub async fn guard_storage<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.storage_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(BookingError::StorageUnavailable {
                    message: format!("{} timed out after {:?}", operation, limit),
                }),
            },
            None => fut.await,
        }
    }
}
