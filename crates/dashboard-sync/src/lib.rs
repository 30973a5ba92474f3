//! Keeps the dashboard store in sync with the CRM backend.
//!
//! The push channel delivers incremental events; a periodic REST refresh
//! replaces each slice with authoritative data and stands in when the channel
//! is down. User actions are written through the REST API and reflected in the
//! store once the server accepts them.

pub mod actions;
pub mod api;
pub mod backoff;
pub mod banner;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod polling;
pub mod runtime;

pub use actions::ActionHandler;
pub use api::{ApiClient, Resource, Sourced};
pub use backoff::{Jitter, ReconnectBackoff};
pub use config::{ConfigError, ConnectionConfig, HistoryConfig, PollingConfig, SyncConfig, load_config};
pub use connection::{ChannelIdentity, ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{ApiError, Result, SyncError};
pub use polling::{Poller, RefreshReport};
pub use runtime::{DashboardSync, Session};
