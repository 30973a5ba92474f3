//! Follows a user's dashboards from the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dashboard_state::{DashboardSummary, StatusBucket, keys};
use dashboard_sync::{ConnectionStatus, DashboardSync, Session, config};
use serde_json::Value;
use telemetry::SecretString;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "dashboard-watch",
    about = "Stream loan pipeline dashboard updates to the log",
    version
)]
struct Opts {
    /// JSON config file
    #[arg(long, env = "DASHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// REST base URL (overrides config and DASHBOARD_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Push channel base URL (overrides config and DASHBOARD_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    #[arg(long, env = "DASHBOARD_USER_ID")]
    user_id: String,

    #[arg(long, env = "DASHBOARD_ROLE", default_value = "underwriter")]
    role: String,

    /// Bearer token for the session
    #[arg(long, env = "DASHBOARD_TOKEN", hide_env_values = true)]
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    telemetry::init_default("dashboard-watch").context("failed to initialise logging")?;

    let mut sync_config =
        config::load_config(opts.config.as_deref()).context("failed to load configuration")?;
    if let Some(url) = opts.api_url {
        sync_config.api_base_url = url;
    }
    if let Some(url) = opts.ws_url {
        sync_config.ws_base_url = url;
    }
    sync_config.validate()?;

    let session = Session {
        user_id: opts.user_id,
        role: opts.role,
        token: SecretString::from(opts.token),
    };

    let store = dashboard_state::Store::new();
    let sync = DashboardSync::start(sync_config, session, store.clone())
        .await
        .context("failed to start dashboard sync")?;

    let view = Arc::new(|key: &str, value: &Value| log_change(key, value));
    let _binding = dashboard_state::bind(
        &store,
        [keys::DASHBOARD_SUMMARY, keys::WS_STATUS, keys::BANNER],
        view,
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("interrupted");
        }
        _ = sync.session_invalidated() => {
            warn!("session expired; sign in again");
        }
    }

    sync.shutdown().await;
    Ok(())
}

fn log_change(key: &str, value: &Value) {
    match key {
        keys::DASHBOARD_SUMMARY => {
            let Ok(summary) = serde_json::from_value::<DashboardSummary>(value.clone()) else {
                warn!("summary has unexpected shape");
                return;
            };
            let breakdown: Vec<String> = StatusBucket::ALL
                .iter()
                .map(|bucket| format!("{bucket}={}", summary.count(*bucket)))
                .collect();
            info!(
                total = summary.total_applications,
                approval_rate = summary.approval_rate,
                demo = summary.is_demo,
                breakdown = %breakdown.join(" "),
                "dashboard summary"
            );
        }
        keys::WS_STATUS => {
            if let Ok(status) = serde_json::from_value::<ConnectionStatus>(value.clone()) {
                info!(
                    state = ?status.state,
                    attempt = status.attempt,
                    error = status.last_error.as_deref().unwrap_or_default(),
                    "push channel"
                );
            }
        }
        keys::BANNER => {
            if let Some(message) = value.get("message").and_then(Value::as_str) {
                warn!(message, "banner");
            }
        }
        _ => {}
    }
}
