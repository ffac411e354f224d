//! Diagnostic logging via `tracing` and `tracing-subscriber`.
//!
//! The level comes from the `--log-level` flag when given, otherwise from
//! `REALITY_PROXY_LOG`, otherwise `warn`. Events go to stderr so stdout stays
//! reserved for command output such as synthesised templates.

use std::env;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt;

/// Environment variable consulted when no level flag is passed.
pub const LOG_ENV_VAR: &str = "REALITY_PROXY_LOG";

const DEFAULT_LEVEL: Level = Level::WARN;

/// Raised when a global subscriber is already installed.
#[derive(Debug, Error)]
#[error("failed to initialise logging: {0}")]
pub struct LoggingError(String);

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`LoggingError`] when a subscriber has already been installed.
pub fn init(cli_level: Option<Level>) -> Result<(), LoggingError> {
    let level = resolve_level(cli_level, env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| LoggingError(err.to_string()))
}

/// Picks the effective level from the flag and the environment value.
#[must_use]
pub fn resolve_level(cli_level: Option<Level>, env_value: Option<&str>) -> Level {
    cli_level
        .or_else(|| env_value.and_then(parse_level))
        .unwrap_or(DEFAULT_LEVEL)
}

fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(Level::DEBUG), Some("error"), Level::DEBUG)]
    #[case(None, Some("info"), Level::INFO)]
    #[case(None, Some(" Warning "), Level::WARN)]
    #[case(None, Some("verbose"), Level::WARN)]
    #[case(None, None, Level::WARN)]
    fn flag_beats_environment_beats_default(
        #[case] cli_level: Option<Level>,
        #[case] env_value: Option<&str>,
        #[case] expected: Level,
    ) {
        assert_eq!(resolve_level(cli_level, env_value), expected);
    }
}
