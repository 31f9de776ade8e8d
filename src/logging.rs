//! # Structured Logging Module
//!
//! Environment-aware structured logging with console output and an optional
//! JSON file layer for debugging async pipeline runs.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Console output is always enabled. When `PLACEFLOW_LOG_DIR` is set, a
/// JSON file layer is added under that directory, one file per process.
/// Safe to call more than once; only the first call takes effect.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);

        let console_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_filter(EnvFilter::new(log_level.clone()));

        let file_layer = std::env::var("PLACEFLOW_LOG_DIR").ok().map(|dir| {
            let log_dir = PathBuf::from(dir);
            if !log_dir.exists() {
                let _ = fs::create_dir_all(&log_dir);
            }
            let filename = format!(
                "{}.{}.{}.log",
                environment,
                process::id(),
                Utc::now().format("%Y%m%d_%H%M%S")
            );
            let file = fs::File::create(log_dir.join(filename)).expect("create log file");
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
        });

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer);

        // A global subscriber may already be set by a test harness.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            "structured logging initialized"
        );
    });
}

/// Get the current environment from environment variables.
fn get_environment() -> String {
    std::env::var("PLACEFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get the default log level for an environment, unless RUST_LOG overrides it.
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level;
    }
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_detection() {
        std::env::set_var("PLACEFLOW_ENV", "test_override");
        assert_eq!(get_environment(), "test_override");
        std::env::remove_var("PLACEFLOW_ENV");
    }

    #[test]
    fn log_level_mapping() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
    }
}
