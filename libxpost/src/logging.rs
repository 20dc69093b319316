//! Logging setup for the xpost daemon
//!
//! Log output always goes to stderr. The format and level come from the
//! command line when given, then from `XPOST_LOG_FORMAT` and
//! `XPOST_LOG_LEVEL`, then default to text at `info`. A `RUST_LOG` filter,
//! when set, overrides the level entirely.
//!
//! # Examples
//!
//! ```no_run
//! use libxpost::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::resolve(Some(LogFormat::Json), false).init();
//! ```

use std::str::FromStr;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_ENV: &str = "XPOST_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "XPOST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines without colors
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line colored output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl LoggingConfig {
    /// Combine command-line choices with the environment
    ///
    /// `verbose` forces the `debug` level. An unparsable `XPOST_LOG_FORMAT`
    /// falls back to text.
    pub fn resolve(format: Option<LogFormat>, verbose: bool) -> Self {
        let format = format
            .or_else(|| {
                std::env::var(LOG_FORMAT_ENV)
                    .ok()
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(LogFormat::Text);

        let level = if verbose {
            "debug".to_string()
        } else {
            std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string())
        };

        Self { format, level }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber
    ///
    /// Does nothing if one is already installed, so tests may call it more
    /// than once.
    pub fn init(&self) {
        let filter = self.filter();
        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(false)
                .try_init(),
        };

        if let Err(e) = result {
            tracing::debug!("Logging already initialized: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var(LOG_FORMAT_ENV);
        std::env::remove_var(LOG_LEVEL_ENV);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml"
            .parse::<LogFormat>()
            .unwrap_err()
            .contains("Invalid log format: 'yaml'"));
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    #[serial]
    fn test_resolve_defaults() {
        clear_env();
        let config = LoggingConfig::resolve(None, false);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
    }

    #[test]
    #[serial]
    fn test_resolve_from_env() {
        clear_env();
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_LEVEL_ENV, "warn");

        let config = LoggingConfig::resolve(None, false);
        clear_env();

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "warn");
    }

    #[test]
    #[serial]
    fn test_cli_overrides_env() {
        clear_env();
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_LEVEL_ENV, "warn");

        let config = LoggingConfig::resolve(Some(LogFormat::Pretty), true);
        clear_env();

        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "debug");
    }

    #[test]
    #[serial]
    fn test_bad_env_format_falls_back_to_text() {
        clear_env();
        std::env::set_var(LOG_FORMAT_ENV, "xml");
        let config = LoggingConfig::resolve(None, false);
        clear_env();

        assert_eq!(config.format, LogFormat::Text);
    }
}
