// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Logging initialization.
//!
//! Installs a `tracing-subscriber` registry. `RUST_LOG` takes precedence
//! over the configured level.

use keel_config::{LogFormat, LoggingConfig};
use tracing::Level;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// =============================================================================
// Logging Initialization
// =============================================================================

/// Installs the global subscriber.
///
/// Fails instead of panicking when a subscriber is already installed, so
/// tests and embedding applications may call it more than once.
///
/// # Example
///
/// ```ignore
/// use keel_server::logging::init_logging;
/// use keel_config::LogFormat;
///
/// init_logging("debug", LogFormat::Json)?;
/// ```
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = build_filter(level);
    match format {
        LogFormat::Text => {
            let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stdout());
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_names(true)
                        .with_ansi(is_terminal),
                )
                .try_init()
        }
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    }
}

/// Installs the subscriber described by a logging section.
pub fn init_from_config(config: &LoggingConfig) -> Result<(), TryInitError> {
    init_logging(&config.level, config.format)
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str()))
}

/// Parses a level name; unknown names fall back to `INFO`.
pub fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_second_init_reports_error() {
        // Whichever call installs first wins; the other must not panic.
        let first = init_logging("info", LogFormat::Compact);
        let second = init_logging("debug", LogFormat::Json);
        assert!(first.is_err() || second.is_err());
    }
}
