//! Structured logging setup.
//!
//! # Features
//!
//! - **Structured Logging**: key/value fields on every event
//! - **Span Tracking**: `#[instrument]` spans on RPC and database calls
//! - **Multiple Formats**: console (pretty or JSON) and rotating JSON file
//! - **Environment Filtering**: `RUST_LOG` support
//!
//! # Usage
//!
//! ```no_run
//! use ctoken_rate_monitor::observability;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // Keep the guard alive for the whole process when logging to a file.
//!     let _guard = observability::init_tracing(None, None, false)?;
//!     Ok(())
//! }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! RUST_LOG=ctoken_rate_monitor=debug,sqlx=warn ctoken-rate-monitor watch
//! LOG_LEVEL=debug ctoken-rate-monitor watch
//! LOG_JSON=true LOG_FILE=./logs/monitor.log ctoken-rate-monitor watch
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_FILTER: &str = "ctoken_rate_monitor=info,warn";

/// Pick the filter directive: `RUST_LOG`, then `log_level`, then [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .or(log_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Logging options read from `LOG_LEVEL`, `LOG_FILE` and `LOG_JSON`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter used when `RUST_LOG` is unset.
    pub level: Option<String>,
    /// Daily-rotated JSON log file.
    pub file: Option<PathBuf>,
    /// JSON console output instead of pretty-printed.
    pub json: bool,
}

impl LogSettings {
    /// Read the settings from the process environment, after loading `.env`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the settings through `lookup`. Empty values count as unset and
    /// an unparsable `LOG_JSON` means pretty output.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            level: non_empty("LOG_LEVEL"),
            file: non_empty("LOG_FILE").map(PathBuf::from),
            json: non_empty("LOG_JSON")
                .and_then(|value| value.trim().parse::<bool>().ok())
                .unwrap_or(false),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// # Arguments
///
/// * `log_level` - Filter used when `RUST_LOG` is unset (e.g. `"debug"`).
/// * `log_file` - Optional file path; enables a daily-rotated JSON log.
/// * `json_output` - JSON console output instead of pretty-printed.
///
/// Returns the file writer's guard when `log_file` is set. Dropping it
/// flushes and stops the background writer, so hold it until exit.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::new(filter_directive(
        std::env::var("RUST_LOG").ok(),
        log_level,
    ));

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match log_file.as_deref() {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)?;

            let appender = tracing_appender::rolling::daily(
                directory,
                path.file_name().unwrap_or_else(|| OsStr::new("monitor.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        json_output,
        file_logging = guard.is_some(),
        "Tracing initialized"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        assert_eq!(filter_directive(None, None), DEFAULT_FILTER);
        assert_eq!(filter_directive(None, Some("debug".into())), "debug");
        assert_eq!(
            filter_directive(Some("trace".into()), Some("debug".into())),
            "trace"
        );
        assert_eq!(filter_directive(Some(String::new()), None), DEFAULT_FILTER);
    }

    #[test]
    fn test_log_settings_from_lookup() {
        let settings = LogSettings::from_lookup(|key| match key {
            "LOG_LEVEL" => Some("debug".into()),
            "LOG_FILE" => Some("./logs/monitor.log".into()),
            "LOG_JSON" => Some("true".into()),
            "RUST_LOG" => Some("trace".into()),
            _ => None,
        });

        assert_eq!(settings.level.as_deref(), Some("debug"));
        assert_eq!(settings.file, Some(PathBuf::from("./logs/monitor.log")));
        assert!(settings.json);
    }

    #[test]
    fn test_log_settings_defaults() {
        assert_eq!(LogSettings::from_lookup(|_| None), LogSettings::default());

        let settings = LogSettings::from_lookup(|key| match key {
            "LOG_LEVEL" => Some("  ".into()),
            "LOG_JSON" => Some("yes".into()),
            _ => None,
        });
        assert_eq!(settings.level, None);
        assert!(!settings.json);
    }

    #[test]
    fn test_second_init_fails_cleanly() {
        let first = init_tracing(Some("info".into()), None, false);
        let second = init_tracing(Some("info".into()), None, true);
        assert!(first.is_err() || second.is_err());
    }
}
