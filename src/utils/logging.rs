// src/utils/logging.rs
//! Logging utilities for the application.
//!
//! This module provides functions for initializing and configuring
//! the `tracing` subscriber.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// RUST_LOG takes precedence over the configured level
fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Initialize the logging system with console output
pub fn init_logging(log_level: &str) -> io::Result<()> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stdout);

    tracing_subscriber::registry()
        .with(console_layer.with_filter(build_filter(log_level)))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Sets up daily-rotated file logging in addition to console output.
///
/// The returned guard flushes the non-blocking writer when dropped and
/// must be held for the lifetime of the process.
pub fn init_file_logging(log_level: &str, log_file: impl AsRef<Path>) -> io::Result<WorkerGuard> {
    let log_path = log_file.as_ref();
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let log_prefix = log_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "vpn-sim.log".into());

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(non_blocking_writer)
        .with_ansi(false);

    let console_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(file_layer.with_filter(build_filter(log_level)))
        .with(console_layer.with_filter(build_filter(log_level)))
        .try_init()
        .map_err(|e| io::Error::new(
            io::ErrorKind::Other,
            format!("Failed to set global default subscriber: {}", e)
        ))?;

    Ok(guard)
}
