//! Wires the sync components for one authenticated session.

use std::sync::Arc;

use dashboard_state::{ActionDispatcher, Reconciler, Store, Subscription, action_channel};
use telemetry::SecretString;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::ActionHandler;
use crate::api::ApiClient;
use crate::config::SyncConfig;
use crate::connection::{ChannelIdentity, ConnectionManager};
use crate::error::Result;
use crate::polling::{Poller, RefreshReport};

/// The signed-in user. Owned by the auth layer; read-only here.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: String,
    pub role: String,
    pub token: SecretString,
}

pub struct DashboardSync {
    store: Store,
    connection: Arc<ConnectionManager>,
    poller: Poller,
    dispatcher: ActionDispatcher,
    cancel: CancellationToken,
    session_invalid: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    unavailable_watch: Option<Subscription>,
}

impl std::fmt::Debug for DashboardSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSync")
            .field("connection", &self.connection)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl DashboardSync {
    /// Refresh every slice, open the push channel and start the background
    /// loops. Fails only on invalid configuration or a rejected session.
    pub async fn start(config: SyncConfig, session: Session, store: Store) -> Result<Self> {
        config.validate()?;
        info!(user_id = %session.user_id, role = %session.role, "starting dashboard sync");

        let reconciler = Reconciler::with_capacities(
            store.clone(),
            config.history.activity_capacity,
            config.history.alert_capacity,
        );
        let session_invalid = CancellationToken::new();
        let cancel = CancellationToken::new();

        let api = ApiClient::new(&config, session.token.clone())?;
        let poller = Poller::new(
            api.clone(),
            reconciler.clone(),
            config.polling.clone(),
            session_invalid.clone(),
        );

        let initial: RefreshReport = poller.refresh().await?;
        if initial.is_demo() {
            warn!(slices = ?initial.demo, "starting with demo data");
        }

        let unavailable_watch = poller.watch_connection();
        let connection = Arc::new(ConnectionManager::new(
            config.connection.clone(),
            config.ws_base_url.clone(),
            reconciler.clone(),
            session_invalid.clone(),
        ));
        connection
            .connect(ChannelIdentity::new(session.user_id.clone(), session.token.clone()))
            .await?;

        let mut tasks = Vec::new();

        let poll_loop = poller.clone();
        let poll_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = poll_loop.run(poll_cancel).await {
                warn!(error = %err, "poller exited");
            }
        }));

        let (dispatcher, actions) = action_channel();
        let handler = ActionHandler::new(
            api,
            reconciler,
            poller.wake_handle(),
            session_invalid.clone(),
        );
        tasks.push(tokio::spawn(handler.run(actions, cancel.child_token())));

        Ok(Self {
            store,
            connection,
            poller,
            dispatcher,
            cancel,
            session_invalid,
            tasks,
            unavailable_watch: Some(unavailable_watch),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Handle for views to request actions.
    pub fn dispatcher(&self) -> ActionDispatcher {
        self.dispatcher.clone()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Run a refresh now, outside the polling schedule.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.poller.refresh().await
    }

    /// Resolves once any component sees the session rejected.
    pub async fn session_invalidated(&self) {
        self.session_invalid.cancelled().await;
    }

    pub fn is_session_invalid(&self) -> bool {
        self.session_invalid.is_cancelled()
    }

    /// Stop every task, close the channel and clear the store.
    pub async fn shutdown(mut self) {
        info!("shutting down dashboard sync");
        self.cancel.cancel();
        self.connection.disconnect().await;
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await
                && err.is_panic()
            {
                warn!(error = %err, "sync task panicked");
            }
        }
        self.unavailable_watch.take();
        self.store.clear();
    }
}
