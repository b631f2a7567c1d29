//! Dual-sink structured logging: a human-readable console layer (external
//! orchestration tooling scrapes stdout for the stable log lines) plus a
//! JSON file sink for aggregation.

use std::env;
use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, prelude::*, EnvFilter};

/// Returned guard must be held for the process lifetime; dropping it stops
/// the non-blocking file writer from flushing.
pub fn init() -> io::Result<WorkerGuard> {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "agent");
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking_appender).json();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level)).unwrap();

    tracing_subscriber::registry().with(env_filter).with(console_layer).with(file_layer).init();

    tracing::info!("logging initialized with level: {}", log_level);
    Ok(guard)
}
