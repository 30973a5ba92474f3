//! Periodic authoritative refresh.
//!
//! Runs on a fixed interval whether or not the push channel is healthy, and
//! immediately when the channel becomes unavailable. A refresh replaces each
//! slice wholesale and rebuilds the tracked status index, so drift from missed
//! or misapplied push events is corrected within one interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashboard_state::{AlertLevel, Reconciler, Store, Subscription, index_applications, keys};
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, Resource, Sourced};
use crate::banner::{self, BannerReason};
use crate::config::PollingConfig;
use crate::connection::ConnectionState;
use crate::error::{ApiError, Result, SyncError};

/// Outcome of one [`Poller::refresh`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    pub refreshed: Vec<Resource>,
    /// Slices that hold demo data, whether served as such or substituted.
    pub demo: Vec<Resource>,
    pub failed: Vec<(Resource, String)>,
}

impl RefreshReport {
    pub fn is_demo(&self) -> bool {
        !self.demo.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Poller {
    api: ApiClient,
    reconciler: Reconciler,
    config: PollingConfig,
    wake: Arc<Notify>,
    session_invalid: CancellationToken,
}

impl Poller {
    pub fn new(
        api: ApiClient,
        reconciler: Reconciler,
        config: PollingConfig,
        session_invalid: CancellationToken,
    ) -> Self {
        Self {
            api,
            reconciler,
            config,
            wake: Arc::new(Notify::new()),
            session_invalid,
        }
    }

    fn store(&self) -> &Store {
        self.reconciler.store()
    }

    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Refresh immediately whenever `ui.wsStatus` moves into `Unavailable`.
    pub fn watch_connection(&self) -> Subscription {
        let wake = Arc::clone(&self.wake);
        let was_unavailable = AtomicBool::new(false);
        self.store().subscribe(keys::WS_STATUS, move |status| {
            let unavailable = status
                .get("state")
                .cloned()
                .and_then(|state| serde_json::from_value::<ConnectionState>(state).ok())
                == Some(ConnectionState::Unavailable);
            let previously = was_unavailable.swap(unavailable, Ordering::SeqCst);
            if unavailable && !previously {
                info!("push channel unavailable; refreshing from REST");
                wake.notify_one();
            }
        })
    }

    /// Fetch every slice and replace it in the store.
    ///
    /// Only a rejected session is an error. Other failures are substituted
    /// with demo data or, with the fallback disabled, leave the slice as is.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let results: Vec<(Resource, std::result::Result<Sourced, ApiError>)> =
            join_all(Resource::ALL.into_iter().map(|resource| async move {
                (resource, self.api.fetch_or_fallback(resource).await)
            }))
            .await;

        if results
            .iter()
            .any(|(_, result)| matches!(result, Err(ApiError::Unauthorized)))
        {
            self.invalidate_session();
            return Err(SyncError::Unauthorized);
        }

        let mut report = RefreshReport::default();
        let mut slices: Vec<(Resource, Value)> = Vec::new();
        for (resource, result) in results {
            match result {
                Ok(sourced) => {
                    if sourced.is_demo {
                        report.demo.push(resource);
                    }
                    report.refreshed.push(resource);
                    slices.push((resource, sourced.value));
                }
                Err(err) => {
                    warn!(%resource, error = %err, "refresh failed; keeping previous slice");
                    report.failed.push((resource, err.to_string()));
                }
            }
        }

        self.reconciler.exclusive(|store| {
            for (resource, value) in slices {
                if resource == Resource::Applications {
                    let items = value
                        .get("items")
                        .and_then(Value::as_array)
                        .map(|items| index_applications(items))
                        .unwrap_or_default();
                    if let Err(err) = store.set_serialized(keys::APPLICATION_STATUSES, &items) {
                        warn!(error = %err, "status index did not serialize");
                    }
                }
                store.set_state(resource.store_key(), value);
            }
        });

        if report.is_demo() {
            banner::show(
                self.store(),
                AlertLevel::Info,
                BannerReason::DemoData,
                "Showing demo data while the server is unavailable.",
            );
        } else if report.failed.is_empty() {
            banner::dismiss(self.store(), BannerReason::DemoData);
        }

        debug!(
            refreshed = report.refreshed.len(),
            demo = report.demo.len(),
            failed = report.failed.len(),
            "refresh complete"
        );
        Ok(report)
    }

    /// Refresh on every interval tick and on demand until cancelled or the
    /// session is rejected.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            debug!("polling disabled");
            cancel.cancelled().await;
            return Ok(());
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the caller has already refreshed.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("poller stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {
                    ticker.reset();
                }
            }

            match self.refresh().await {
                Ok(_) => {}
                Err(SyncError::Unauthorized) => {
                    warn!("session rejected; polling stopped");
                    return Err(SyncError::Unauthorized);
                }
                Err(err) => warn!(error = %err, "refresh failed"),
            }
        }
    }

    fn invalidate_session(&self) {
        self.store().set_state(keys::SESSION_INVALID, json!(true));
        banner::show(
            self.store(),
            AlertLevel::Critical,
            BannerReason::SessionExpired,
            "Your session has expired. Sign in again.",
        );
        self.session_invalid.cancel();
    }
}
