//! Push-channel connection manager.
//!
//! One channel per authenticated session. The channel task owns the socket:
//! it reconnects with capped exponential backoff, sends heartbeats while open,
//! and reconciles inbound events in delivery order. Transport failures never
//! reach callers; they show up as state transitions under `ui.wsStatus`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashboard_state::{
    AlertLevel, ControlMessage, Inbound, NormalizeError, Reconciler, Store, keys, normalize,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use telemetry::SecretString;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::backoff::ReconnectBackoff;
use crate::banner::{self, BannerReason};
use crate::config::ConnectionConfig;
use crate::error::{Result, SyncError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Reconnecting,
    /// Retries exhausted or session rejected. Only a new `connect` leaves it.
    Unavailable,
}

/// Published under `ui.wsStatus` on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_ms: Option<u64>,
    /// Server-assigned id from `connection.established`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            attempt: 0,
            last_pong_at: None,
            last_error: None,
            next_retry_ms: None,
            connection_id: None,
        }
    }
}

/// Who the channel is opened for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub user_id: String,
    pub token: SecretString,
}

impl ChannelIdentity {
    pub fn new(user_id: impl Into<String>, token: SecretString) -> Self {
        Self {
            user_id: user_id.into(),
            token,
        }
    }
}

/// `{base}/{user_id}` with the user id percent-encoded.
pub fn channel_url(base: &str, user_id: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|err| SyncError::ChannelUrl(format!("{base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| SyncError::ChannelUrl(format!("{base}: cannot take path segments")))?
        .pop_if_empty()
        .push(user_id);
    Ok(url)
}

struct Shared {
    store: Store,
    status: Mutex<ConnectionStatus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Shared {
    fn publish(&self, update: impl FnOnce(&mut ConnectionStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            update(&mut status);
            status.clone()
        };
        trace!(state = ?snapshot.state, attempt = snapshot.attempt, "connection status");
        if let Err(err) = self.store.set_serialized(keys::WS_STATUS, &snapshot) {
            warn!(error = %err, "connection status did not serialize");
        }
    }
}

struct ActiveChannel {
    identity: ChannelIdentity,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    ws_base_url: String,
    reconciler: Reconciler,
    session_invalid: CancellationToken,
    shared: Arc<Shared>,
    active: AsyncMutex<Option<ActiveChannel>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("ws_base_url", &self.ws_base_url)
            .field("status", &*self.shared.status.lock())
            .finish()
    }
}

impl ConnectionManager {
    /// `session_invalid` is cancelled if the server rejects the token.
    pub fn new(
        config: ConnectionConfig,
        ws_base_url: impl Into<String>,
        reconciler: Reconciler,
        session_invalid: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            store: reconciler.store().clone(),
            status: Mutex::new(ConnectionStatus::default()),
            outbound: Mutex::new(None),
        });
        Self {
            config,
            ws_base_url: ws_base_url.into(),
            reconciler,
            session_invalid,
            shared,
            active: AsyncMutex::new(None),
        }
    }

    /// Start the channel for `identity`.
    ///
    /// A no-op while a channel for the same identity is still running. A
    /// different identity replaces the running channel. Only a malformed URL
    /// is reported; transport failures are retried in the background.
    pub async fn connect(&self, identity: ChannelIdentity) -> Result<()> {
        let url = channel_url(&self.ws_base_url, &identity.user_id)?;
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref()
            && current.identity == identity
            && !current.task.is_finished()
        {
            debug!(user_id = %identity.user_id, "channel already running");
            return Ok(());
        }
        if let Some(previous) = active.take() {
            info!(user_id = %previous.identity.user_id, "replacing push channel");
            stop_channel(previous).await;
        }

        let cancel = CancellationToken::new();
        let channel = Channel {
            config: self.config.clone(),
            url,
            token: identity.token.clone(),
            reconciler: self.reconciler.clone(),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
            session_invalid: self.session_invalid.clone(),
        };
        let span = info_span!("push_channel", user_id = %identity.user_id);
        let task = tokio::spawn(channel.run().instrument(span));
        *active = Some(ActiveChannel {
            identity,
            cancel,
            task,
        });
        Ok(())
    }

    /// Queue `message` for the server. Returns `false` unless the channel is open.
    pub fn send(&self, message: &Value) -> bool {
        if self.state() != ConnectionState::Open {
            debug!("channel not open; dropping outbound message");
            return false;
        }
        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(Message::text(message.to_string())).is_ok(),
            None => false,
        }
    }

    /// Stop heartbeats and retries, close the socket, and mark the channel closed.
    pub async fn disconnect(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            stop_channel(previous).await;
            info!("push channel disconnected");
        }
        self.shared.outbound.lock().take();
        if self.state() != ConnectionState::Closed {
            self.shared.publish(|status| {
                status.state = ConnectionState::Closed;
                status.attempt = 0;
                status.next_retry_ms = None;
                status.connection_id = None;
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.lock().clone()
    }
}

async fn stop_channel(mut channel: ActiveChannel) {
    channel.cancel.cancel();
    if timeout(STOP_TIMEOUT, &mut channel.task).await.is_err() {
        warn!("push channel did not stop in time; aborting");
        channel.task.abort();
    }
}

#[derive(Debug)]
enum ConnectError {
    Unauthorized,
    Timeout(Duration),
    Transport(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Unauthorized => f.write_str("unauthorized"),
            ConnectError::Timeout(after) => write!(f, "connect timed out after {after:?}"),
            ConnectError::Transport(msg) => f.write_str(msg),
        }
    }
}

enum Disconnect {
    Cancelled,
    Lost(String),
}

struct Channel {
    config: ConnectionConfig,
    url: Url,
    token: SecretString,
    reconciler: Reconciler,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    session_invalid: CancellationToken,
}

impl Channel {
    async fn run(self) {
        let mut backoff = ReconnectBackoff::from_config(&self.config);

        loop {
            let attempt = backoff.attempt();
            self.shared.publish(|status| {
                status.state = ConnectionState::Connecting;
                status.attempt = attempt;
                status.next_retry_ms = None;
                status.connection_id = None;
            });

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return,
                opened = self.open() => opened,
            };

            let last_error = match opened {
                Ok(stream) => {
                    backoff.reset();
                    let client_id = Uuid::new_v4();
                    info!(url = %self.url, %client_id, "push channel open");
                    self.shared.publish(|status| {
                        status.state = ConnectionState::Open;
                        status.attempt = 0;
                        status.last_error = None;
                    });
                    match self.drive(stream, &mut backoff).await {
                        Disconnect::Cancelled => return,
                        Disconnect::Lost(reason) => {
                            info!(%client_id, reason = %reason, "push channel lost");
                            reason
                        }
                    }
                }
                Err(ConnectError::Unauthorized) => {
                    warn!("push channel rejected the session token");
                    self.shared.store.set_state(keys::SESSION_INVALID, json!(true));
                    self.shared.publish(|status| {
                        status.state = ConnectionState::Unavailable;
                        status.last_error = Some(ConnectError::Unauthorized.to_string());
                        status.next_retry_ms = None;
                    });
                    self.session_invalid.cancel();
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "push channel connect failed");
                    err.to_string()
                }
            };

            let Some(delay) = backoff.next_delay() else {
                warn!(
                    attempts = backoff.attempt(),
                    error = %last_error,
                    "reconnect attempts exhausted; live updates unavailable"
                );
                self.shared.publish(|status| {
                    status.state = ConnectionState::Unavailable;
                    status.last_error = Some(last_error);
                    status.next_retry_ms = None;
                });
                banner::show(
                    &self.shared.store,
                    AlertLevel::Warning,
                    BannerReason::ChannelUnavailable,
                    "Live updates are unavailable. Reload to reconnect.",
                );
                return;
            };

            let attempt = backoff.attempt();
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(attempt, delay_ms, "scheduling reconnect");
            self.shared.publish(|status| {
                status.state = ConnectionState::Reconnecting;
                status.attempt = attempt;
                status.last_error = Some(last_error);
                status.next_retry_ms = Some(delay_ms);
                status.connection_id = None;
            });

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }

    async fn open(&self) -> std::result::Result<WsStream, ConnectError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| ConnectError::Transport(err.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
            .map_err(|_| ConnectError::Unauthorized)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let connect_timeout = self.config.connect_timeout();
        match timeout(connect_timeout, connect_async(request)).await {
            Err(_) => Err(ConnectError::Timeout(connect_timeout)),
            Ok(Err(tungstenite::Error::Http(response)))
                if response.status() == StatusCode::UNAUTHORIZED =>
            {
                Err(ConnectError::Unauthorized)
            }
            Ok(Err(err)) => Err(ConnectError::Transport(err.to_string())),
            Ok(Ok((stream, _response))) => Ok(stream),
        }
    }

    async fn drive(&self, stream: WsStream, backoff: &mut ReconnectBackoff) -> Disconnect {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.shared.outbound.lock() = Some(tx);

        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ping = json!({ "type": "ping" }).to_string();

        let outcome = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Disconnect::Cancelled;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = write.send(Message::text(ping.clone())).await {
                        break Disconnect::Lost(err.to_string());
                    }
                    trace!("heartbeat sent");
                }
                Some(message) = rx.recv() => {
                    if let Err(err) = write.send(message).await {
                        break Disconnect::Lost(err.to_string());
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text, backoff),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.handle_text(text, backoff),
                        Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => format!("closed by server ({}): {}", frame.code, &*frame.reason),
                            None => "closed by server".to_string(),
                        };
                        break Disconnect::Lost(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Disconnect::Lost(err.to_string()),
                    None => break Disconnect::Lost("stream ended".to_string()),
                },
            }
        };

        self.shared.outbound.lock().take();
        outcome
    }

    fn handle_text(&self, raw: &str, backoff: &mut ReconnectBackoff) {
        match normalize(raw) {
            Ok(Inbound::Domain(event)) => {
                self.reconciler.apply(&event);
            }
            Ok(Inbound::Control(ControlMessage::ConnectionEstablished { connection_id })) => {
                backoff.reset();
                info!(
                    connection_id = connection_id.as_deref().unwrap_or_default(),
                    "connection established"
                );
                self.shared.publish(|status| {
                    status.attempt = 0;
                    status.connection_id = connection_id;
                });
            }
            Ok(Inbound::Control(ControlMessage::Pong)) => {
                self.shared
                    .publish(|status| status.last_pong_at = Some(Utc::now()));
            }
            Err(NormalizeError::UnknownType(kind)) => {
                debug!(kind = %kind, "ignoring unknown push event type");
            }
            Err(err) => {
                warn!(error = %err, "dropping malformed push message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_appends_user_id() {
        let url = channel_url("wss://crm.test/ws/", "u 1").unwrap();
        assert_eq!(url.as_str(), "wss://crm.test/ws/u%201");
        let url = channel_url("ws://localhost:3000/ws", "42").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/ws/42");
    }

    #[test]
    fn status_wire_shape() {
        let status = ConnectionStatus {
            state: ConnectionState::Reconnecting,
            attempt: 2,
            next_retry_ms: Some(4000),
            ..ConnectionStatus::default()
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({
                "state": "reconnecting",
                "attempt": 2,
                "lastPongAt": null,
                "lastError": null,
                "nextRetryMs": 4000
            })
        );
    }

    #[tokio::test]
    async fn send_is_refused_when_not_open() {
        let store = Store::new();
        let manager = ConnectionManager::new(
            ConnectionConfig::default(),
            "ws://127.0.0.1:9/ws",
            Reconciler::new(store),
            CancellationToken::new(),
        );
        assert!(!manager.send(&json!({"type": "ping"})));
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
