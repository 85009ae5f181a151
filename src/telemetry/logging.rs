//! Diagnostic logging setup
//!
//! The library itself only emits `tracing` events. Applications that want to
//! see them can install a subscriber with [`init_logging`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::TraceError;

/// Log level for diagnostic output control
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    /// No output at all
    OFF,
    /// Only error messages
    ERROR,
    /// Error and warning messages
    WARN,
    /// Error, warning, and info messages
    INFO,
    /// Error, warning, info, and debug messages
    DEBUG,
    /// All messages including trace
    TRACE,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::INFO
    }
}

impl LogLevel {
    /// Filter directive understood by `EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::OFF => "off",
            LogLevel::ERROR => "error",
            LogLevel::WARN => "warn",
            LogLevel::INFO => "info",
            LogLevel::DEBUG => "debug",
            LogLevel::TRACE => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::OFF => write!(f, "OFF"),
            LogLevel::ERROR => write!(f, "ERROR"),
            LogLevel::WARN => write!(f, "WARN"),
            LogLevel::INFO => write!(f, "INFO"),
            LogLevel::DEBUG => write!(f, "DEBUG"),
            LogLevel::TRACE => write!(f, "TRACE"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OFF" => Ok(LogLevel::OFF),
            "ERROR" => Ok(LogLevel::ERROR),
            "WARN" | "WARNING" => Ok(LogLevel::WARN),
            "INFO" => Ok(LogLevel::INFO),
            "DEBUG" => Ok(LogLevel::DEBUG),
            "TRACE" => Ok(LogLevel::TRACE),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default)]
    pub level: LogLevel,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once returns a configuration error instead of panicking.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TraceError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.as_directive()))
        .map_err(|e| TraceError::configuration_error(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| {
        TraceError::configuration_error(format!("Failed to install log subscriber: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::WARN));
        assert_eq!("Debug".parse::<LogLevel>(), Ok(LogLevel::DEBUG));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_serde_round_trip() {
        let config: LoggingConfig = serde_json::from_str(r#"{"level":"trace","json":true}"#).unwrap();
        assert_eq!(config.level, LogLevel::TRACE);
        assert!(config.json);
        assert_eq!(
            serde_json::to_string(&config).unwrap(),
            r#"{"level":"TRACE","json":true}"#
        );
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::DEBUG > LogLevel::INFO);
        assert!(LogLevel::OFF < LogLevel::ERROR);
    }
}
