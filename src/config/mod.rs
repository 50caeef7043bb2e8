pub mod toml_config;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "diet-booking")]
#[command(about = "Dietitian appointment availability and conflict-safe booking")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "booking.toml", global = true)]
    pub config: String,

    /// Override storage.database_url from the config file
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List bookable slots for a dietitian on a date
    Slots {
        #[arg(long)]
        dietitian: String,
        /// ISO date, e.g. 2024-05-01
        #[arg(long)]
        date: String,
    },
    /// Book a slot for a patient
    Book {
        #[arg(long)]
        dietitian: String,
        #[arg(long)]
        date: String,
        /// Time of day, HH:MM
        #[arg(long)]
        time: String,
        #[arg(long)]
        patient: String,
    },
    /// Cancel a reservation by id
    Cancel { id: String },
    /// Export a dietitian's reservations
    Reservations {
        #[arg(long)]
        dietitian: String,
        #[arg(long)]
        from: String,
        /// Defaults to --from
        #[arg(long)]
        to: Option<String>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
    /// Follow availability for a dietitian and date
    Watch {
        #[arg(long)]
        dietitian: String,
        #[arg(long)]
        date: String,
        /// Stop after this many seconds
        #[arg(long, default_value = "60")]
        seconds: u64,
    },
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}
