// Tracing log adapter - Structured logging using the tracing crate

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::domain::errors::DomainError;

/// Parse a log level name
pub fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this twice is
/// harmless; the second subscriber is ignored.
pub fn init_logging(level: &str, json: bool) -> Result<(), DomainError> {
    let level = parse_level(level).ok_or_else(|| {
        DomainError::config(format!(
            "Invalid log level: {}. Valid levels: trace, debug, info, warn, error",
            level
        ))
    })?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init fails only if a subscriber is already installed
    let _ = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    Ok(())
}
