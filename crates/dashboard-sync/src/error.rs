//! Error types for the sync layer.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by [`ApiClient`](crate::api::ApiClient).
#[derive(Error, Debug)]
pub enum ApiError {
    /// The session token was rejected.
    #[error("session is no longer authorized")]
    Unauthorized,

    #[error("request timed out")]
    Timeout,

    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Failures a demo payload may stand in for.
    pub fn is_recoverable_read_failure(&self) -> bool {
        match self {
            ApiError::Unauthorized | ApiError::Url(_) => false,
            ApiError::Status { status, .. } => *status != 401,
            ApiError::Timeout | ApiError::Http(_) | ApiError::Json(_) => true,
        }
    }
}

/// Errors that cross the sync layer boundary.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("session is no longer authorized")]
    Unauthorized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(ApiError),

    #[error("invalid channel URL: {0}")]
    ChannelUrl(String),
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => SyncError::Unauthorized,
            other => SyncError::Api(other),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
