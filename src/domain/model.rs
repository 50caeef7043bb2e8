use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::error::{BookingError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};

/// 時段在 API 與資料庫中的文字格式
pub const SLOT_TIME_FORMAT: &str = "%H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DietitianId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub Uuid);

impl DietitianId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ReservationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DietitianId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ReservationId {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| BookingError::ValidationError {
                message: format!("invalid reservation id '{}': {}", s, e),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "CANCELLED" => Ok(ReservationStatus::Cancelled),
            other => Err(BookingError::StorageFailure {
                message: format!("unknown reservation status '{}'", other),
            }),
        }
    }
}

/// 已提交的預約紀錄，由 ReservationStore 獨佔擁有
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub dietitian_id: DietitianId,
    pub patient_id: PatientId,
    pub date: NaiveDate,
    #[serde(with = "slot_time_format")]
    pub slot_time: NaiveTime,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.slot_time)
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            dietitian_id: self.dietitian_id.clone(),
            date: self.date,
            slot_time: self.slot_time,
        }
    }
}

/// 唯一性鍵：(dietitian_id, date, slot_time)，僅對未取消的預約生效
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub dietitian_id: DietitianId,
    pub date: NaiveDate,
    pub slot_time: NaiveTime,
}

/// 可用時段查詢，不會被持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub dietitian_id: DietitianId,
    pub date: NaiveDate,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub dietitian_id: DietitianId,
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_slot_times")]
    pub slots: Vec<NaiveTime>,
}

impl AvailabilityResult {
    /// ISO 時間字串（HH:MM），依時間遞增
    pub fn iso_slots(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|t| t.format(SLOT_TIME_FORMAT).to_string())
            .collect()
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.slots.binary_search(&time).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub dietitian_id: DietitianId,
    pub date: NaiveDate,
    #[serde(with = "slot_time_format")]
    pub slot_time: NaiveTime,
    pub patient_id: PatientId,
}

impl BookingRequest {
    pub fn new(
        dietitian_id: DietitianId,
        date: NaiveDate,
        slot_time: NaiveTime,
        patient_id: PatientId,
    ) -> Self {
        Self {
            dietitian_id,
            date,
            slot_time,
            patient_id,
        }
    }

    /// 從 API 層的 ISO 文字欄位解析預約請求
    pub fn parse(dietitian: &str, date: &str, time: &str, patient: &str) -> Result<Self> {
        let request = Self::new(
            DietitianId::new(dietitian.trim()),
            parse_date(date)?,
            parse_slot_time(time)?,
            PatientId::new(patient.trim()),
        );
        request.validate()?;
        Ok(request)
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.slot_time)
    }

    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            dietitian_id: self.dietitian_id.clone(),
            date: self.date,
            slot_time: self.slot_time,
        }
    }
}

impl Validate for BookingRequest {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("dietitian_id", self.dietitian_id.as_str())?;
        validate_non_empty_string("patient_id", self.patient_id.as_str())?;
        Ok(())
    }
}

/// ReservationStore::insert_if_absent 的結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Reservation),
    Conflict,
}

/// ReservationStore::cancel 的結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(Reservation),
    AlreadyCancelled(Reservation),
    NotFound,
}

/// 預約變動事件，供即時可用時段推播使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationEvent {
    Booked(SlotKey),
    Cancelled(SlotKey),
}

impl ReservationEvent {
    pub fn key(&self) -> &SlotKey {
        match self {
            ReservationEvent::Booked(key) | ReservationEvent::Cancelled(key) => key,
        }
    }

    pub fn affects(&self, dietitian: &DietitianId, date: NaiveDate) -> bool {
        let key = self.key();
        &key.dietitian_id == dietitian && key.date == date
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        BookingError::ValidationError {
            message: format!("invalid date '{}': {}", value, e),
        }
    })
}

/// 接受 HH:MM 或 HH:MM:SS
pub fn parse_slot_time(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, SLOT_TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| BookingError::ValidationError {
            message: format!("invalid time of day '{}': {}", value, e),
        })
}

fn serialize_slot_times<S>(slots: &[NaiveTime], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(slots.iter().map(|t| t.format(SLOT_TIME_FORMAT).to_string()))
}

mod slot_time_format {
    use super::SLOT_TIME_FORMAT;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(SLOT_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_slot_time(&raw).map_err(serde::de::Error::custom)
    }
}
