//! Structured logging for the dashboard sync workspace.
//!
//! Provides:
//! - Pretty terminal output or bunyan-style JSON lines
//! - A `log` crate bridge so dependencies logging through `log` show up
//! - A quiet initialiser for tests
//! - [`SecretString`] for tokens that must never be logged
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG` - filter directive (default: "info")
//! - `LOG_FORMAT` - "json" or "pretty" (default: "pretty")
//! - `TEST_LOG` - if set, enables logs in test mode

pub mod config;
pub mod error;
pub mod layers;
pub mod secrets;

pub use config::{LogFormat, TelemetryConfig};
pub use error::{Result, TelemetryError};
pub use secrets::SecretString;

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Initialise the global subscriber from environment variables.
pub fn init_default(name: &str) -> Result<()> {
    init_with_config(name, TelemetryConfig::from_env())
}

/// Like [`init_default`] with a different fallback filter.
pub fn init_with_filter(name: &str, default_filter: &str) -> Result<()> {
    init_with_config(name, TelemetryConfig::from_env().with_filter(default_filter))
}

/// Initialise the global subscriber with explicit settings.
///
/// `RUST_LOG` still wins over `config.filter` when set.
pub fn init_with_config(name: &str, config: TelemetryConfig) -> Result<()> {
    let _ = LogTracer::init();

    let env_filter = build_filter(&config.filter)?;

    match config.format {
        LogFormat::Json => {
            let (storage_layer, formatting_layer) = layers::JsonLayer::layers(name);
            let subscriber = Registry::default()
                .with(env_filter)
                .with(storage_layer)
                .with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
        }
        LogFormat::Pretty => {
            let formatting_layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false);
            let subscriber = Registry::default()
                .with(env_filter)
                .with(formatting_layer);
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
        }
    }
}

fn build_filter(default_directive: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive).map_err(|e| TelemetryError::InvalidFilter {
        directive: default_directive.to_string(),
        message: e.to_string(),
    })
}

/// Initialise logging for tests.
///
/// Logs are suppressed unless `TEST_LOG` is set. Safe to call from every test.
pub fn init_test() {
    let config = TelemetryConfig::from_env()
        .with_filter("debug")
        .with_test_mode(true);

    if config.should_suppress_logs() {
        return;
    }

    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = LogTracer::init();

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.filter));

        let formatting_layer = fmt::layer().with_target(true).with_test_writer();

        let subscriber = Registry::default()
            .with(env_filter)
            .with(formatting_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_default_filter_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = build_filter("dashboard=notalevel").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn init_test_is_idempotent() {
        init_test();
        init_test();
    }
}
