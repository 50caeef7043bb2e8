use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日誌輸出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 終端機閱讀用
    Compact,
    /// 服務部署時以 JSON 行輸出，方便集中收集
    Json,
}

/// RUST_LOG 優先；未設定時依 verbose 決定本 crate 的層級
fn booking_filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose {
        "diet_booking=debug,info"
    } else {
        "diet_booking=info,warn"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// 初始化全域 subscriber，輸出到 stderr 讓 stdout 保留給查詢結果與匯出資料。
/// 重複初始化時忽略（測試中多次呼叫也安全）
pub fn init_logger(format: LogFormat, verbose: bool) {
    let registry = tracing_subscriber::registry().with(booking_filter(verbose));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let installed = match format {
        LogFormat::Compact => registry
            .with(fmt_layer.with_target(false).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt_layer.with_target(true).json())
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Logger already initialised, keeping existing subscriber");
    }
}
