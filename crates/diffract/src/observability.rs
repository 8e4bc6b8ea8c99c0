//! Logging setup.
//!
//! The library only emits `tracing` events; binaries call [`init_logging`] once.

use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{DiffractError, Result};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines, one event per line.
    Json,
    /// Human-readable, multi-line.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = DiffractError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(DiffractError::Config(format!(
                "unknown log format '{}' (expected pretty or json)",
                other
            ))),
        }
    }
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over `default_level` when set. Subsequent calls are no-ops.
///
/// ```
/// use diffract::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty, "info");
/// ```
pub fn init_logging(format: LogFormat, default_level: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        // try_init: a test harness may already have installed a subscriber.
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(false))
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false))
                .try_init(),
        };
    });
}

/// Span wrapping one reduction of `experiment`.
#[must_use]
pub fn reduction_span(experiment: &str, dataset: &str) -> Span {
    tracing::info_span!("reduction", experiment = experiment, dataset = dataset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_twice() {
        init_logging(LogFormat::Pretty, "warn");
        init_logging(LogFormat::Json, "warn");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_span_helper() {
        let span = reduction_span("lysozyme", "scan");
        let _guard = span.enter();
        tracing::info!("inside reduction span");
    }
}
