//! Telemetry configuration read from the environment.

use std::env;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable terminal output.
    #[default]
    Pretty,
    /// Bunyan JSON, one object per line.
    Json,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value. Unknown values fall back to pretty.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" | "bunyan" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
    /// Set by [`crate::init_test`]; logs are dropped unless `TEST_LOG` is set.
    pub test_mode: bool,
    test_log_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryConfig {
    pub fn new() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
            test_mode: false,
            test_log_enabled: false,
        }
    }

    /// Read `LOG_FORMAT` and `TEST_LOG`.
    pub fn from_env() -> Self {
        let format = env::var("LOG_FORMAT")
            .map(|value| LogFormat::parse(&value))
            .unwrap_or_default();
        Self {
            format,
            test_log_enabled: env::var_os("TEST_LOG").is_some(),
            ..Self::new()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Tests stay quiet unless `TEST_LOG` was set.
    pub fn should_suppress_logs(&self) -> bool {
        self.test_mode && !self.test_log_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_format() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("bunyan"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("weird"), LogFormat::Pretty);
    }

    #[test]
    fn test_mode_suppresses_without_test_log() {
        let config = TelemetryConfig::new().with_test_mode(true);
        assert!(config.should_suppress_logs());
        assert!(!TelemetryConfig::new().should_suppress_logs());
    }
}
