use crate::domain::model::DietitianId;
use crate::domain::ports::{TimeRange, WorkingCalendar, WorkingDay};
use crate::utils::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// 營養師請假：整天或指定時段，涵蓋 [from, to] 日期區間
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    pub dietitian_id: DietitianId,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// None 代表整天請假
    pub window: Option<TimeRange>,
}

impl Leave {
    pub fn full_day(dietitian_id: DietitianId, from: NaiveDate, to: NaiveDate) -> Result<Self> {
        Self::build(dietitian_id, from, to, None)
    }

    pub fn hourly(
        dietitian_id: DietitianId,
        from: NaiveDate,
        to: NaiveDate,
        window: TimeRange,
    ) -> Result<Self> {
        if window.start >= window.end {
            return Err(BookingError::ValidationError {
                message: format!(
                    "leave window {}-{} must start before it ends",
                    window.start.format("%H:%M"),
                    window.end.format("%H:%M")
                ),
            });
        }
        Self::build(dietitian_id, from, to, Some(window))
    }

    fn build(
        dietitian_id: DietitianId,
        from: NaiveDate,
        to: NaiveDate,
        window: Option<TimeRange>,
    ) -> Result<Self> {
        if from > to {
            return Err(BookingError::ValidationError {
                message: format!("leave for {} starts {} after it ends {}", dietitian_id, from, to),
            });
        }
        Ok(Self {
            dietitian_id,
            from,
            to,
            window,
        })
    }

    fn covers(&self, dietitian: &DietitianId, date: NaiveDate) -> bool {
        &self.dietitian_id == dietitian && self.from <= date && date <= self.to
    }
}

/// 營養師每週固定的工作時段，例如星期一 09:00-12:00
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingHours {
    pub dietitian_id: DietitianId,
    pub weekday: Weekday,
    pub window: TimeRange,
}

impl WorkingHours {
    pub fn new(dietitian_id: DietitianId, weekday: Weekday, window: TimeRange) -> Result<Self> {
        if window.start >= window.end {
            return Err(BookingError::ValidationError {
                message: format!(
                    "working hours {}-{} on {:?} must start before they end",
                    window.start.format("%H:%M"),
                    window.end.format("%H:%M"),
                    weekday
                ),
            });
        }
        Ok(Self {
            dietitian_id,
            weekday,
            window,
        })
    }
}

/// 以每週休息日、營養師工作時段與請假紀錄構成的工作日曆。
/// 沒有設定工作時段的營養師沿用整個診所時段表；
/// 有設定者只在列出的星期與時段內可預約
#[derive(Debug, Clone, Default)]
pub struct WeeklyCalendar {
    closed_weekdays: HashSet<Weekday>,
    working_hours: Vec<WorkingHours>,
    leaves: Vec<Leave>,
}

impl WeeklyCalendar {
    pub fn new(closed_weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        Self {
            closed_weekdays: closed_weekdays.into_iter().collect(),
            working_hours: Vec::new(),
            leaves: Vec::new(),
        }
    }

    pub fn with_working_hours(mut self, hours: WorkingHours) -> Self {
        self.working_hours.push(hours);
        self
    }

    pub fn with_leave(mut self, leave: Leave) -> Self {
        self.leaves.push(leave);
        self
    }

    pub fn leaves(&self) -> &[Leave] {
        &self.leaves
    }

    pub fn working_hours(&self) -> &[WorkingHours] {
        &self.working_hours
    }

    pub fn resolve(&self, dietitian: &DietitianId, date: NaiveDate) -> WorkingDay {
        if self.closed_weekdays.contains(&date.weekday()) {
            return WorkingDay::Closed;
        }

        let mut blocked = Vec::new();
        for leave in self.leaves.iter().filter(|l| l.covers(dietitian, date)) {
            match leave.window {
                None => return WorkingDay::Closed,
                Some(window) => blocked.push(window),
            }
        }

        let template: Vec<&WorkingHours> = self
            .working_hours
            .iter()
            .filter(|h| &h.dietitian_id == dietitian)
            .collect();
        if template.is_empty() {
            return WorkingDay::Open {
                hours: None,
                blocked,
            };
        }

        let mut windows: Vec<TimeRange> = template
            .iter()
            .filter(|h| h.weekday == date.weekday())
            .map(|h| h.window)
            .collect();
        if windows.is_empty() {
            return WorkingDay::Closed;
        }
        windows.sort_by_key(|w| w.start);

        WorkingDay::Open {
            hours: Some(windows),
            blocked,
        }
    }
}

#[async_trait]
impl WorkingCalendar for WeeklyCalendar {
    async fn day_for(&self, dietitian: &DietitianId, date: NaiveDate) -> Result<WorkingDay> {
        Ok(self.resolve(dietitian, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn d(day: u32) -> NaiveDate {
        // 2024-05-05 是星期日
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn test_closed_weekday() {
        let calendar = WeeklyCalendar::new([Weekday::Sun]);
        let d1 = DietitianId::new("D1");
        assert_eq!(calendar.resolve(&d1, d(5)), WorkingDay::Closed);
        assert_eq!(calendar.resolve(&d1, d(6)), WorkingDay::open());
    }

    #[test]
    fn test_full_day_leave_only_affects_its_dietitian() {
        let d1 = DietitianId::new("D1");
        let calendar = WeeklyCalendar::default()
            .with_leave(Leave::full_day(d1.clone(), d(1), d(3)).unwrap());

        assert_eq!(calendar.resolve(&d1, d(2)), WorkingDay::Closed);
        assert_eq!(calendar.resolve(&d1, d(4)), WorkingDay::open());
        assert_eq!(calendar.resolve(&DietitianId::new("D2"), d(2)), WorkingDay::open());
    }

    #[test]
    fn test_hourly_leave_blocks_window() {
        let d1 = DietitianId::new("D1");
        let window = TimeRange::new(t(12), t(14));
        let calendar = WeeklyCalendar::default()
            .with_leave(Leave::hourly(d1.clone(), d(1), d(1), window).unwrap());

        assert_eq!(
            calendar.resolve(&d1, d(1)),
            WorkingDay::Open {
                hours: None,
                blocked: vec![window]
            }
        );
    }

    #[test]
    fn test_working_hours_template() {
        let d1 = DietitianId::new("D1");
        let calendar = WeeklyCalendar::default()
            .with_working_hours(
                WorkingHours::new(d1.clone(), Weekday::Wed, TimeRange::new(t(13), t(17))).unwrap(),
            )
            .with_working_hours(
                WorkingHours::new(d1.clone(), Weekday::Wed, TimeRange::new(t(9), t(12))).unwrap(),
            )
            .with_leave(
                Leave::hourly(d1.clone(), d(1), d(1), TimeRange::new(t(10), t(11))).unwrap(),
            );

        // 2024-05-01 是星期三
        assert_eq!(
            calendar.resolve(&d1, d(1)),
            WorkingDay::Open {
                hours: Some(vec![TimeRange::new(t(9), t(12)), TimeRange::new(t(13), t(17))]),
                blocked: vec![TimeRange::new(t(10), t(11))],
            }
        );
        // 星期四不在 D1 的工作時段內
        assert_eq!(calendar.resolve(&d1, d(2)), WorkingDay::Closed);
        // 其他營養師沒有設定時段，沿用診所時段表
        assert_eq!(calendar.resolve(&DietitianId::new("D2"), d(2)), WorkingDay::open());
    }

    #[test]
    fn test_rejects_inverted_working_hours() {
        let d1 = DietitianId::new("D1");
        assert!(WorkingHours::new(d1, Weekday::Mon, TimeRange::new(t(12), t(9))).is_err());
    }

    #[test]
    fn test_rejects_inverted_leave() {
        let d1 = DietitianId::new("D1");
        assert!(Leave::full_day(d1.clone(), d(3), d(1)).is_err());
        assert!(Leave::hourly(d1, d(1), d(1), TimeRange::new(t(14), t(12))).is_err());
    }
}
