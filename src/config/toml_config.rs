use crate::adapters::{Leave, SqliteStoreOptions, WeeklyCalendar, WorkingHours};
use crate::core::feed::FeedPolicy;
use crate::core::rules::BookingRules;
use crate::core::slot_grid::SlotGrid;
use crate::core::{DietitianId, TimeRange};
use crate::domain::model::parse_date;
use crate::utils::error::{BookingError, Result};
use crate::utils::retry::RetryPolicy;
use crate::utils::validation::{
    validate_database_url, validate_positive_number, validate_range, validate_time_of_day,
    validate_weekday, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingConfig {
    pub grid: GridConfig,
    pub booking: RulesConfig,
    pub storage: StorageConfig,
    pub calendar: CalendarConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub open: String,
    pub close: String,
    pub slot_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub buffer_minutes: u32,
    pub max_advance_days: Option<u32>,
    pub max_daily_per_patient: Option<u32>,
    pub max_weekly_per_patient: Option<u32>,
    pub max_daily_per_dietitian: Option<u32>,
    pub min_cancel_notice_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// 單次儲存層呼叫逾時；0 代表不限制
    pub timeout_seconds: u64,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub closed_weekdays: Vec<String>,
    pub hours: Vec<WorkingHoursConfig>,
    pub leave: Vec<LeaveConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingHoursConfig {
    pub dietitian: String,
    pub weekday: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveConfig {
    pub dietitian: String,
    pub from: String,
    pub to: String,
    /// 未設定 start/end 代表整天請假
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: usize,
    pub poll_interval_ms: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            open: "09:00".to_string(),
            close: "18:00".to_string(),
            slot_minutes: 30,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: 30,
            max_advance_days: Some(90),
            max_daily_per_patient: Some(3),
            max_weekly_per_patient: Some(7),
            max_daily_per_dietitian: Some(12),
            min_cancel_notice_minutes: 120,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://bookings.db".to_string(),
            max_connections: 5,
            timeout_seconds: 5,
            retry_attempts: 3,
            retry_delay_ms: 200,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            poll_interval_ms: 30_000,
        }
    }
}

impl BookingConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(BookingError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 檔案不存在時使用預設值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| BookingError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATABASE_URL})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| BookingError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn slot_grid(&self) -> Result<SlotGrid> {
        let open = validate_time_of_day("grid.open", &self.grid.open)?;
        let close = validate_time_of_day("grid.close", &self.grid.close)?;
        SlotGrid::business_hours(open, close, self.grid.slot_minutes)
    }

    pub fn rules(&self) -> BookingRules {
        BookingRules {
            buffer: chrono::Duration::minutes(self.booking.buffer_minutes as i64),
            max_advance_days: self.booking.max_advance_days,
            max_daily_per_patient: self.booking.max_daily_per_patient,
            max_weekly_per_patient: self.booking.max_weekly_per_patient,
            max_daily_per_dietitian: self.booking.max_daily_per_dietitian,
            min_cancel_notice: chrono::Duration::minutes(
                self.booking.min_cancel_notice_minutes as i64,
            ),
            storage_timeout: match self.storage.timeout_seconds {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn store_options(&self) -> SqliteStoreOptions {
        let timeout = Duration::from_secs(self.storage.timeout_seconds.max(1));
        SqliteStoreOptions {
            database_url: self.storage.database_url.clone(),
            max_connections: self.storage.max_connections,
            acquire_timeout: timeout,
            busy_timeout: timeout,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.storage.retry_attempts,
            self.storage.retry_delay_ms,
            self.storage.retry_delay_ms.saturating_mul(8),
        )
    }

    pub fn feed_policy(&self) -> FeedPolicy {
        FeedPolicy::new(
            Duration::from_millis(self.feed.reconnect_delay_ms),
            self.feed.max_reconnect_attempts,
            Duration::from_millis(self.feed.poll_interval_ms),
        )
    }

    pub fn calendar(&self) -> Result<WeeklyCalendar> {
        let closed = self
            .calendar
            .closed_weekdays
            .iter()
            .map(|day| validate_weekday("calendar.closed_weekdays", day))
            .collect::<Result<Vec<_>>>()?;

        let mut calendar = WeeklyCalendar::new(closed);
        for entry in &self.calendar.hours {
            calendar = calendar.with_working_hours(entry.to_working_hours()?);
        }
        for entry in &self.calendar.leave {
            calendar = calendar.with_leave(entry.to_leave()?);
        }
        Ok(calendar)
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        self.slot_grid()?;
        validate_range("booking.buffer_minutes", self.booking.buffer_minutes, 0, 24 * 60)?;
        let limits = [
            ("booking.max_daily_per_patient", self.booking.max_daily_per_patient),
            ("booking.max_weekly_per_patient", self.booking.max_weekly_per_patient),
            ("booking.max_daily_per_dietitian", self.booking.max_daily_per_dietitian),
        ];
        for (field, limit) in limits {
            if let Some(limit) = limit {
                validate_positive_number(field, limit as usize, 1)?;
            }
        }

        validate_database_url("storage.database_url", &self.storage.database_url)?;
        validate_positive_number(
            "storage.max_connections",
            self.storage.max_connections as usize,
            1,
        )?;
        validate_positive_number("storage.retry_attempts", self.storage.retry_attempts, 1)?;

        validate_positive_number(
            "feed.max_reconnect_attempts",
            self.feed.max_reconnect_attempts,
            1,
        )?;
        validate_positive_number("feed.poll_interval_ms", self.feed.poll_interval_ms as usize, 1)?;

        self.calendar()?;
        Ok(())
    }
}

impl LeaveConfig {
    fn to_leave(&self) -> Result<Leave> {
        let dietitian = DietitianId::new(self.dietitian.trim());
        let from = parse_date(&self.from)?;
        let to = parse_date(&self.to)?;

        match (&self.start, &self.end) {
            (None, None) => Leave::full_day(dietitian, from, to),
            (Some(start), Some(end)) => {
                let window = TimeRange::new(
                    validate_time_of_day("calendar.leave.start", start)?,
                    validate_time_of_day("calendar.leave.end", end)?,
                );
                Leave::hourly(dietitian, from, to, window)
            }
            _ => Err(BookingError::MissingConfigError {
                field: "calendar.leave.start/end".to_string(),
            }),
        }
    }
}

impl WorkingHoursConfig {
    fn to_working_hours(&self) -> Result<WorkingHours> {
        let window = TimeRange::new(
            validate_time_of_day("calendar.hours.start", &self.start)?,
            validate_time_of_day("calendar.hours.end", &self.end)?,
        );
        WorkingHours::new(
            DietitianId::new(self.dietitian.trim()),
            validate_weekday("calendar.hours.weekday", &self.weekday)?,
            window,
        )
    }
}

impl Validate for BookingConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
