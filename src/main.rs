use clap::Parser;
use diet_booking::adapters::export::{write_reservations_csv, write_reservations_json};
use diet_booking::config::{Command, ExportFormat};
use diet_booking::core::{BookingRequest, DietitianId, ReservationId};
use diet_booking::domain::model::parse_date;
use diet_booking::utils::error::ErrorSeverity;
use diet_booking::utils::logger::{self, LogFormat};
use diet_booking::utils::validation::Validate;
use diet_booking::{
    BookingConfig, BookingEngine, CliConfig, SqliteReservationStore, SystemClock, WeeklyCalendar,
};
use std::sync::Arc;
use std::time::Duration;

type Engine = BookingEngine<SqliteReservationStore, WeeklyCalendar>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 初始化日誌
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    logger::init_logger(format, cli.verbose);

    tracing::debug!("CLI config: {:?}", cli);

    let mut config = match BookingConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", cli.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    if let Some(url) = &cli.database_url {
        config.storage.database_url = url.clone();
        tracing::info!("🔧 Database URL overridden to: {}", url);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if let Err(e) = run(&cli.command, &config).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::debug!("Suggested HTTP status: {}", e.http_status());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());

        let exit_code = match e.severity() {
            ErrorSeverity::Low => 4,      // 衝突，請重新選擇時段
            ErrorSeverity::Medium => 2,   // 可重試
            ErrorSeverity::High => 1,     // 輸入或設定錯誤
            ErrorSeverity::Critical => 3, // 系統錯誤
        };
        std::process::exit(exit_code);
    }

    Ok(())
}

async fn run(command: &Command, config: &BookingConfig) -> diet_booking::Result<()> {
    let store = Arc::new(SqliteReservationStore::connect(&config.store_options()).await?);
    let engine: Engine = BookingEngine::new(
        config.slot_grid()?,
        config.rules(),
        store.clone(),
        Arc::new(config.calendar()?),
        Arc::new(SystemClock),
    )
    .with_retry(config.retry_policy());

    let result = execute(command, config, &engine).await;
    store.close().await;
    result
}

async fn execute(command: &Command, config: &BookingConfig, engine: &Engine) -> diet_booking::Result<()> {
    match command {
        Command::Slots { dietitian, date } => {
            let result = engine
                .available_slots(&DietitianId::new(dietitian.trim()), parse_date(date)?)
                .await?;
            tracing::info!("📅 {} open slots for {} on {}", result.slots.len(), dietitian, date);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Book {
            dietitian,
            date,
            time,
            patient,
        } => {
            let request = BookingRequest::parse(dietitian, date, time, patient)?;
            let reservation = engine.book(&request).await?;
            println!("✅ Reservation confirmed: {}", reservation.id);
            println!("{}", serde_json::to_string_pretty(&reservation)?);
        }
        Command::Cancel { id } => {
            let id: ReservationId = id.parse()?;
            let reservation = engine.cancel(id).await?;
            println!("🗑️ Reservation {} is {}", reservation.id, reservation.status.as_str());
        }
        Command::Reservations {
            dietitian,
            from,
            to,
            format,
        } => {
            let from = parse_date(from)?;
            let to = match to {
                Some(to) => parse_date(to)?,
                None => from,
            };
            let reservations = engine
                .reservations(&DietitianId::new(dietitian.trim()), from, to)
                .await?;
            tracing::info!("📁 Exporting {} reservations", reservations.len());

            let stdout = std::io::stdout();
            match format {
                ExportFormat::Json => write_reservations_json(&reservations, stdout.lock())?,
                ExportFormat::Csv => write_reservations_csv(&reservations, stdout.lock())?,
            }
        }
        Command::Watch {
            dietitian,
            date,
            seconds,
        } => {
            // SQLite 沒有變更推播，改用輪詢
            let handle = engine.watch(
                DietitianId::new(dietitian.trim()),
                parse_date(date)?,
                None,
                config.feed_policy(),
            );
            let mut snapshots = handle.subscribe();
            let deadline = tokio::time::sleep(Duration::from_secs(*seconds));
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = snapshots.borrow_and_update().clone();
                        let slots: Vec<String> = snapshot
                            .slots
                            .iter()
                            .map(|t| t.format("%H:%M").to_string())
                            .collect();
                        println!("[{:?}] {}", snapshot.mode, slots.join(" "));
                    }
                }
            }

            handle.shutdown().await;
        }
    }

    Ok(())
}
