use crate::domain::model::{
    BookingRequest, CancelOutcome, DietitianId, InsertOutcome, PatientId, Reservation,
    ReservationId, ReservationStatus, DATE_FORMAT, SLOT_TIME_FORMAT,
};
use crate::domain::ports::ReservationStore;
use crate::utils::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

/// 唯一性由部分唯一索引保證：同一營養師、日期、時段最多一筆未取消的預約。
/// 取消後時段可立即再被預約。
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS reservations (
        id TEXT PRIMARY KEY NOT NULL,
        dietitian_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        slot_date TEXT NOT NULL,
        slot_time TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('CONFIRMED', 'CANCELLED')),
        created_at TEXT NOT NULL,
        cancelled_at TEXT
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS reservations_active_slot
        ON reservations (dietitian_id, slot_date, slot_time)
        WHERE status <> 'CANCELLED'"#,
    r#"CREATE INDEX IF NOT EXISTS reservations_patient_day
        ON reservations (patient_id, slot_date)"#,
];

const SELECT_COLUMNS: &str =
    "id, dietitian_id, patient_id, slot_date, slot_time, status, created_at, cancelled_at";

#[derive(Debug, Clone)]
pub struct SqliteStoreOptions {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            database_url: "sqlite://bookings.db".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    id: String,
    dietitian_id: String,
    patient_id: String,
    slot_date: String,
    slot_time: String,
    status: String,
    created_at: String,
    cancelled_at: Option<String>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = BookingError;

    fn try_from(row: ReservationRow) -> Result<Self> {
        Ok(Reservation {
            id: row.id.parse().map_err(|_| corrupt("id", &row.id))?,
            dietitian_id: DietitianId::new(row.dietitian_id),
            patient_id: PatientId::new(row.patient_id),
            date: NaiveDate::parse_from_str(&row.slot_date, DATE_FORMAT)
                .map_err(|_| corrupt("slot_date", &row.slot_date))?,
            slot_time: NaiveTime::parse_from_str(&row.slot_time, SLOT_TIME_FORMAT)
                .map_err(|_| corrupt("slot_time", &row.slot_time))?,
            status: row.status.parse()?,
            created_at: parse_timestamp("created_at", &row.created_at)?,
            cancelled_at: row
                .cancelled_at
                .as_deref()
                .map(|raw| parse_timestamp("cancelled_at", raw))
                .transpose()?,
        })
    }
}

fn corrupt(column: &str, value: &str) -> BookingError {
    BookingError::StorageFailure {
        message: format!("undecodable {} value '{}'", column, value),
    }
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| corrupt(column, raw))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_time(time: NaiveTime) -> String {
    time.format(SLOT_TIME_FORMAT).to_string()
}

/// SQLite 預約儲存，跨行程、跨實例都由資料庫約束保證唯一性
#[derive(Debug, Clone)]
pub struct SqliteReservationStore {
    pool: SqlitePool,
}

impl SqliteReservationStore {
    pub async fn connect(options: &SqliteStoreOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&options.database_url)
            .map_err(|e| BookingError::InvalidConfigValueError {
                field: "storage.database_url".to_string(),
                value: options.database_url.clone(),
                reason: e.to_string(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        // 每條 :memory: 連線都是獨立的資料庫，只能保留單一常駐連線
        let pool_options = if options.database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(options.max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::debug!("Connected to reservation database {}", options.database_url);
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {} FROM reservations WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Reservation::try_from).transpose()
    }
}

#[async_trait]
impl ReservationStore for SqliteReservationStore {
    async fn insert_if_absent(
        &self,
        request: &BookingRequest,
        created_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let reservation = Reservation {
            id: ReservationId::generate(),
            dietitian_id: request.dietitian_id.clone(),
            patient_id: request.patient_id.clone(),
            date: request.date,
            slot_time: request.slot_time,
            status: ReservationStatus::Confirmed,
            created_at,
            cancelled_at: None,
        };

        // 單一 INSERT；唯一索引衝突即代表時段已被佔用
        let inserted = sqlx::query(
            "INSERT INTO reservations \
             (id, dietitian_id, patient_id, slot_date, slot_time, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reservation.id.to_string())
        .bind(reservation.dietitian_id.as_str())
        .bind(reservation.patient_id.as_str())
        .bind(format_date(reservation.date))
        .bind(format_time(reservation.slot_time))
        .bind(reservation.status.as_str())
        .bind(reservation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(reservation)),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Conflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_active(
        &self,
        dietitian: &DietitianId,
        date: NaiveDate,
    ) -> Result<BTreeSet<NaiveTime>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT slot_time FROM reservations \
             WHERE dietitian_id = ? AND slot_date = ? AND status = 'CONFIRMED'",
        )
        .bind(dietitian.as_str())
        .bind(format_date(date))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, SLOT_TIME_FORMAT).map_err(|_| corrupt("slot_time", raw))
            })
            .collect()
    }

    async fn cancel(&self, id: ReservationId, cancelled_at: DateTime<Utc>) -> Result<CancelOutcome> {
        let updated = sqlx::query(
            "UPDATE reservations SET status = 'CANCELLED', cancelled_at = ? \
             WHERE id = ? AND status = 'CONFIRMED'",
        )
        .bind(cancelled_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        let current = self.fetch(id).await?;
        Ok(match current {
            None => CancelOutcome::NotFound,
            Some(reservation) if updated.rows_affected() == 1 => CancelOutcome::Cancelled(reservation),
            Some(reservation) => CancelOutcome::AlreadyCancelled(reservation),
        })
    }

    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>> {
        self.fetch(id).await
    }

    async fn count_active_for_patient_between(
        &self,
        patient: &PatientId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations \
             WHERE patient_id = ? AND slot_date >= ? AND slot_date <= ? AND status = 'CONFIRMED'",
        )
        .bind(patient.as_str())
        .bind(format_date(from))
        .bind(format_date(to))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    async fn list_for_dietitian(
        &self,
        dietitian: &DietitianId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {} FROM reservations \
             WHERE dietitian_id = ? AND slot_date >= ? AND slot_date <= ? \
             ORDER BY slot_date, slot_time, created_at",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(dietitian.as_str())
            .bind(format_date(from))
            .bind(format_date(to))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Reservation::try_from).collect()
    }
}
