//! Structured logging setup using the `tracing` ecosystem.
//!
//! Console output is always compact and human-readable; the file sink rolls
//! daily and can be switched to JSON for log shipping.

use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::PlResult;

/// File name prefix for the rolling log file.
const LOG_FILE_NAME: &str = "parley.log";

/// Guard that keeps the non-blocking log writer alive.
/// Drop this to flush and close the log file.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Build the filter for a level string.
///
/// Accepts anything `EnvFilter` understands ("debug", "pl_services=trace,info").
/// An unparsable level falls back to `info` rather than failing startup.
fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global tracing subscriber.
///
/// Installs a console layer on stderr plus a daily-rolling file layer in
/// `log_dir`. When `json_output` is set the file layer emits one JSON object
/// per event.
pub fn init_logging(level: &str, log_dir: &Path, json_output: bool) -> PlResult<LogGuard> {
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_NAME));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    // The two file layers have different types, so each branch installs its own stack.
    if json_output {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(build_filter(level))
            .with(console_layer)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_line_number(true),
            )
            .init();
    }

    tracing::info!(level, dir = %log_dir.display(), "logging initialized");

    Ok(LogGuard { _guard: guard })
}

/// Initialize logging from a resolved [`LoggingConfig`] section.
pub fn init_from_config(config: &LoggingConfig, log_dir: &Path) -> PlResult<LogGuard> {
    init_logging(&config.level, log_dir, config.json_output)
}

/// Initialize a minimal console-only logger for tests or simple CLI usage.
///
/// Safe to call repeatedly; only the first call installs a subscriber.
pub fn init_console_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logging_is_idempotent() {
        init_console_logging("debug");
        init_console_logging("trace");
    }
}
