//! Telemetry error types.

use thiserror::Error;

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),

    /// The filter directive could not be parsed.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },
}

/// Telemetry result type.
pub type Result<T> = std::result::Result<T, TelemetryError>;
