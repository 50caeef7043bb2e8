use crate::core::{TimeRange, WorkingDay};
use crate::utils::error::{BookingError, Result};
use chrono::{Duration, NaiveTime, Timelike};

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// 固定的可預約時段表：嚴格遞增、互不重疊，建立後不可變
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    slots: Vec<NaiveTime>,
    duration: Duration,
}

impl SlotGrid {
    pub fn new(slots: Vec<NaiveTime>, duration: Duration) -> Result<Self> {
        if duration <= Duration::zero() {
            return Err(BookingError::ConfigValidationError {
                field: "grid.slot_minutes".to_string(),
                message: "slot duration must be positive".to_string(),
            });
        }
        if duration.num_seconds() % 60 != 0 || duration.subsec_nanos() != 0 {
            return Err(BookingError::ConfigValidationError {
                field: "grid.slot_minutes".to_string(),
                message: "slot duration must be a whole number of minutes".to_string(),
            });
        }

        for slot in &slots {
            // 時段以 HH:MM 保存與傳輸，秒數會在儲存層遺失
            if slot.second() != 0 || slot.nanosecond() != 0 {
                return Err(BookingError::ConfigValidationError {
                    field: "grid".to_string(),
                    message: format!(
                        "slot {} must start on a whole minute",
                        slot.format("%H:%M:%S%.f")
                    ),
                });
            }
            let end = seconds_of(*slot) as i64 + duration.num_seconds();
            if end > SECONDS_PER_DAY as i64 {
                return Err(BookingError::ConfigValidationError {
                    field: "grid".to_string(),
                    message: format!("slot {} would end after midnight", slot.format("%H:%M")),
                });
            }
        }

        for pair in slots.windows(2) {
            if pair[0] >= pair[1] {
                return Err(BookingError::ConfigValidationError {
                    field: "grid".to_string(),
                    message: format!(
                        "slots must be strictly increasing ({} then {})",
                        pair[0].format("%H:%M"),
                        pair[1].format("%H:%M")
                    ),
                });
            }
            if pair[0] + duration > pair[1] {
                return Err(BookingError::ConfigValidationError {
                    field: "grid".to_string(),
                    message: format!(
                        "slot {} overlaps slot {}",
                        pair[0].format("%H:%M"),
                        pair[1].format("%H:%M")
                    ),
                });
            }
        }

        Ok(Self { slots, duration })
    }

    /// 以營業時間產生時段；最後一個時段必須在 close 之前結束
    pub fn business_hours(open: NaiveTime, close: NaiveTime, slot_minutes: u32) -> Result<Self> {
        if open >= close {
            return Err(BookingError::ConfigValidationError {
                field: "grid.open".to_string(),
                message: "opening time must be before closing time".to_string(),
            });
        }
        if slot_minutes == 0 {
            return Err(BookingError::ConfigValidationError {
                field: "grid.slot_minutes".to_string(),
                message: "slot duration must be positive".to_string(),
            });
        }

        let step = slot_minutes * 60;
        let close_secs = seconds_of(close);
        let mut slots = Vec::new();
        let mut start = seconds_of(open);
        while start + step <= close_secs {
            if let Some(slot) = NaiveTime::from_num_seconds_from_midnight_opt(start, 0) {
                slots.push(slot);
            }
            start += step;
        }

        Self::new(slots, Duration::minutes(slot_minutes as i64))
    }

    pub fn slots_for_day(&self) -> &[NaiveTime] {
        &self.slots
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.slots.binary_search(&time).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_end(&self, start: NaiveTime) -> NaiveTime {
        start + self.duration
    }

    /// 套用營業日資訊後的實際時段：休息日為空，
    /// 有工作時段時只保留完整落在其中的時段，請假時段被移除
    pub fn effective_slots(&self, day: &WorkingDay) -> Vec<NaiveTime> {
        match day {
            WorkingDay::Closed => Vec::new(),
            WorkingDay::Open { hours, blocked } => self
                .slots
                .iter()
                .copied()
                .filter(|slot| match hours {
                    Some(windows) => windows.iter().any(|w| self.fits_within(*slot, w)),
                    None => true,
                })
                .filter(|slot| {
                    let end = self.slot_end(*slot);
                    !blocked.iter().any(|range| range.overlaps(*slot, end))
                })
                .collect(),
        }
    }

    fn fits_within(&self, slot: NaiveTime, window: &TimeRange) -> bool {
        let start = seconds_of(slot) as i64;
        let end = start + self.duration.num_seconds();
        seconds_of(window.start) as i64 <= start && end <= seconds_of(window.end) as i64
    }
}

impl Default for SlotGrid {
    fn default() -> Self {
        let slots = (0..18)
            .filter_map(|i| NaiveTime::from_hms_opt(9 + i / 2, (i % 2) * 30, 0))
            .collect();
        Self {
            slots,
            duration: Duration::minutes(30),
        }
    }
}

fn seconds_of(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}
