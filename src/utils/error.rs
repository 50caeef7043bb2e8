use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Slot {time} is not on the booking grid for {date}")]
    InvalidSlot { date: NaiveDate, time: NaiveTime },

    #[error("Slot {date} {time} has passed or starts within the {buffer_minutes}-minute preparation buffer")]
    PastSlot {
        date: NaiveDate,
        time: NaiveTime,
        buffer_minutes: i64,
    },

    #[error("Date {date} is beyond the {max_days}-day booking window")]
    OutsideBookingWindow { date: NaiveDate, max_days: u32 },

    #[error("Slot {date} {time} for dietitian {dietitian} is no longer available")]
    Conflict {
        dietitian: String,
        date: NaiveDate,
        time: NaiveTime,
    },

    #[error("Patient {patient} already holds {limit} reservations on {date}")]
    PatientLimitReached {
        patient: String,
        date: NaiveDate,
        limit: u32,
    },

    #[error("Patient {patient} already holds {limit} reservations in the week starting {week_start}")]
    PatientWeeklyLimitReached {
        patient: String,
        week_start: NaiveDate,
        limit: u32,
    },

    #[error("Dietitian {dietitian} has reached the daily capacity of {capacity} reservations on {date}")]
    DietitianCapacityReached {
        dietitian: String,
        date: NaiveDate,
        capacity: u32,
    },

    #[error("Reservation {id} not found")]
    ReservationNotFound { id: String },

    #[error("Reservation {id} starts in less than {notice_minutes} minutes and can no longer be cancelled")]
    CancellationTooLate { id: String, notice_minutes: i64 },

    #[error("Reservation store unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Reservation store error: {message}")]
    StorageFailure { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV export error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

pub type Result<T> = std::result::Result<T, BookingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 呼叫端輸入錯誤，不應重試
    Caller,
    /// 與其他預約競爭失敗，需重新查詢可用時段
    Conflict,
    /// 暫時性錯誤，可退避後重試
    Transient,
    Configuration,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BookingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BookingError::InvalidSlot { .. }
            | BookingError::PastSlot { .. }
            | BookingError::OutsideBookingWindow { .. }
            | BookingError::PatientLimitReached { .. }
            | BookingError::PatientWeeklyLimitReached { .. }
            | BookingError::DietitianCapacityReached { .. }
            | BookingError::ReservationNotFound { .. }
            | BookingError::CancellationTooLate { .. }
            | BookingError::ValidationError { .. } => ErrorCategory::Caller,
            BookingError::Conflict { .. } => ErrorCategory::Conflict,
            BookingError::StorageUnavailable { .. } => ErrorCategory::Transient,
            BookingError::ConfigError { .. }
            | BookingError::ConfigValidationError { .. }
            | BookingError::InvalidConfigValueError { .. }
            | BookingError::MissingConfigError { .. } => ErrorCategory::Configuration,
            BookingError::StorageFailure { .. }
            | BookingError::IoError(_)
            | BookingError::SerializationError(_)
            | BookingError::CsvError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Conflict => ErrorSeverity::Low,
            ErrorCategory::Transient => ErrorSeverity::Medium,
            ErrorCategory::Caller | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Internal => ErrorSeverity::Critical,
        }
    }

    /// 僅儲存層無法連線時可重試；衝突永遠不自動重試
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::StorageUnavailable { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::Conflict { .. })
    }

    /// API 層對應的 HTTP 狀態碼
    pub fn http_status(&self) -> u16 {
        match self {
            BookingError::Conflict { .. } => 409,
            BookingError::InvalidSlot { .. }
            | BookingError::PastSlot { .. }
            | BookingError::OutsideBookingWindow { .. }
            | BookingError::PatientLimitReached { .. }
            | BookingError::PatientWeeklyLimitReached { .. }
            | BookingError::DietitianCapacityReached { .. }
            | BookingError::CancellationTooLate { .. }
            | BookingError::ValidationError { .. } => 422,
            BookingError::ReservationNotFound { .. } => 404,
            BookingError::StorageUnavailable { .. } => 503,
            _ => 500,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BookingError::InvalidSlot { .. } => "Pick one of the times returned by the availability query",
            BookingError::PastSlot { .. } => "Choose a later slot or another date",
            BookingError::OutsideBookingWindow { .. } => "Choose a date inside the booking window",
            BookingError::Conflict { .. } => "Slot no longer available, please re-select",
            BookingError::PatientLimitReached { .. } => "Book on another day or cancel an existing reservation",
            BookingError::PatientWeeklyLimitReached { .. } => "Book in another week or cancel an existing reservation",
            BookingError::DietitianCapacityReached { .. } => "Choose another day or another dietitian",
            BookingError::ReservationNotFound { .. } => "Check the reservation identifier",
            BookingError::CancellationTooLate { .. } => "Contact the dietitian directly",
            BookingError::StorageUnavailable { .. } => "Retry after a short delay",
            BookingError::StorageFailure { .. } => "Inspect the reservation database for corrupt rows",
            BookingError::ConfigError { .. }
            | BookingError::ConfigValidationError { .. }
            | BookingError::InvalidConfigValueError { .. }
            | BookingError::MissingConfigError { .. } => "Fix the configuration file and try again",
            BookingError::ValidationError { .. } => "Check the request arguments",
            BookingError::IoError(_) => "Check file permissions and paths",
            BookingError::SerializationError(_) | BookingError::CsvError(_) => {
                "Retry the export; report the problem if it persists"
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BookingError::Conflict { .. } => {
                "This slot was just taken by someone else. Please select another time.".to_string()
            }
            BookingError::StorageUnavailable { .. } => {
                "The booking service is temporarily unavailable. Please try again shortly.".to_string()
            }
            BookingError::StorageFailure { .. } | BookingError::IoError(_) => {
                "An internal error occurred while processing the booking.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for BookingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BookingError::StorageUnavailable {
                message: err.to_string(),
            },
            sqlx::Error::Database(ref db_err)
                if db_err.code().is_some_and(|code| is_transient_sqlite_code(&code)) =>
            {
                BookingError::StorageUnavailable {
                    message: err.to_string(),
                }
            }
            other => BookingError::StorageFailure {
                message: other.to_string(),
            },
        }
    }
}

/// SQLite 結果碼（含延伸碼）中屬於暫時性的：BUSY、LOCKED、IOERR、CANTOPEN。
/// 其餘如 no such table、READONLY、CORRUPT 重試也不會成功
fn is_transient_sqlite_code(code: &str) -> bool {
    match code.parse::<i32>() {
        Ok(extended) => matches!(extended & 0xff, 5 | 6 | 10 | 14),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn time() -> NaiveTime {
        NaiveTime::from_hms_opt(10, 0, 0).unwrap()
    }

    #[test]
    fn test_http_status_mapping() {
        let conflict = BookingError::Conflict {
            dietitian: "D1".into(),
            date: date(),
            time: time(),
        };
        assert_eq!(conflict.http_status(), 409);

        let invalid = BookingError::InvalidSlot { date: date(), time: time() };
        assert_eq!(invalid.http_status(), 422);

        let past = BookingError::PastSlot {
            date: date(),
            time: time(),
            buffer_minutes: 30,
        };
        assert_eq!(past.http_status(), 422);

        let down = BookingError::StorageUnavailable { message: "timeout".into() };
        assert_eq!(down.http_status(), 503);
    }

    #[test]
    fn test_only_storage_unavailable_is_retryable() {
        assert!(BookingError::StorageUnavailable { message: "x".into() }.is_retryable());
        assert!(!BookingError::StorageFailure { message: "x".into() }.is_retryable());
        assert!(!BookingError::Conflict {
            dietitian: "D1".into(),
            date: date(),
            time: time(),
        }
        .is_retryable());
    }

    #[test]
    fn test_pool_timeout_maps_to_unavailable() {
        let err: BookingError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Transient);

        let err: BookingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BookingError::StorageFailure { .. }));
    }

    #[test]
    fn test_sqlite_result_codes() {
        // 主結果碼
        assert!(is_transient_sqlite_code("5"));
        assert!(is_transient_sqlite_code("6"));
        assert!(is_transient_sqlite_code("10"));
        assert!(is_transient_sqlite_code("14"));
        // 延伸碼：BUSY_SNAPSHOT、IOERR_READ
        assert!(is_transient_sqlite_code("517"));
        assert!(is_transient_sqlite_code("266"));

        // SQLITE_ERROR、READONLY、CORRUPT、CONSTRAINT_UNIQUE
        assert!(!is_transient_sqlite_code("1"));
        assert!(!is_transient_sqlite_code("8"));
        assert!(!is_transient_sqlite_code("11"));
        assert!(!is_transient_sqlite_code("2067"));
        assert!(!is_transient_sqlite_code("not-a-code"));
    }

    #[test]
    fn test_severity_ordering() {
        let conflict = BookingError::Conflict {
            dietitian: "D1".into(),
            date: date(),
            time: time(),
        };
        assert_eq!(conflict.severity(), ErrorSeverity::Low);
        assert!(ErrorSeverity::Critical > ErrorSeverity::Medium);
    }
}
