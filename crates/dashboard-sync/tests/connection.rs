//! Push channel behaviour against a local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use dashboard_state::{Reconciler, Store, keys};
use dashboard_sync::banner::{self, BannerReason};
use dashboard_sync::{ChannelIdentity, ConnectionConfig, ConnectionManager, ConnectionState};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use telemetry::SecretString;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_async, accept_hdr_async};
use tokio_util::sync::CancellationToken;

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_interval_ms: 5_000,
        server_idle_timeout_ms: 10_000,
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 200,
        max_reconnect_attempts: 5,
        reconnect_jitter: false,
        connect_timeout_ms: 2_000,
    }
}

struct Client {
    store: Store,
    manager: ConnectionManager,
    session_invalid: CancellationToken,
}

fn client(addr: std::net::SocketAddr, config: ConnectionConfig) -> Client {
    telemetry::init_test();
    let store = Store::new();
    let session_invalid = CancellationToken::new();
    let manager = ConnectionManager::new(
        config,
        format!("ws://{addr}/ws"),
        Reconciler::new(store.clone()),
        session_invalid.clone(),
    );
    Client {
        store,
        manager,
        session_invalid,
    }
}

fn identity() -> ChannelIdentity {
    ChannelIdentity::new("u-1", SecretString::from("tok"))
}

fn ws_state(store: &Store) -> Option<String> {
    store
        .get_state(keys::WS_STATUS)?
        .get("state")?
        .as_str()
        .map(str::to_string)
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn record_statuses(store: &Store) -> (Arc<Mutex<Vec<Value>>>, dashboard_state::Subscription) {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let sub = store.subscribe(keys::WS_STATUS, move |status| sink.lock().push(status.clone()));
    (seen, sub)
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    while let Some(frame) = ws.next().await {
        match frame.ok()? {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

#[tokio::test]
async fn open_channel_reconciles_events_and_sends() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshake_rx) = oneshot::channel::<(String, Option<String>)>();
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_hdr_async(stream, move |req: &Request, resp: Response| {
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = handshake_tx.send((req.uri().path().to_string(), auth));
            Ok::<Response, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        ws.send(Message::text(
            json!({"type": "connection.established", "data": {"connectionId": "c-1"}}).to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::text(
            json!({"type": "new_application", "data": {"applicationId": "a-9", "applicantName": "Kim"}})
                .to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::text("not json".to_string())).await.unwrap();

        while let Some(value) = next_text(&mut ws).await {
            let _ = inbound_tx.send(value);
        }
    });

    let c = client(addr, fast_config());
    c.manager.connect(identity()).await.unwrap();

    let (path, auth) = timeout(Duration::from_secs(5), handshake_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(path, "/ws/u-1");
    assert_eq!(auth.as_deref(), Some("Bearer tok"));

    wait_until("summary from push event", || {
        c.store
            .get_state(keys::DASHBOARD_SUMMARY)
            .is_some_and(|s| s["totalApplications"] == json!(1))
    })
    .await;
    assert_eq!(c.manager.state(), ConnectionState::Open);
    wait_until("connection id", || {
        c.manager.status().connection_id.as_deref() == Some("c-1")
    })
    .await;

    // Connecting again with the same identity keeps the running channel.
    c.manager.connect(identity()).await.unwrap();
    assert_eq!(c.manager.state(), ConnectionState::Open);

    assert!(c.manager.send(&json!({"type": "subscribe", "channel": "queue"})));
    let received = timeout(Duration::from_secs(5), inbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received["type"], json!("subscribe"));

    c.manager.disconnect().await;
    assert_eq!(c.manager.state(), ConnectionState::Closed);
    assert_eq!(ws_state(&c.store).as_deref(), Some("closed"));
    assert!(!c.manager.send(&json!({"type": "subscribe"})));

    // Second disconnect is a no-op.
    c.manager.disconnect().await;
    assert_eq!(c.manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn heartbeat_pings_while_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(value) = next_text(&mut ws).await {
            let _ = ping_tx.send(value);
        }
    });

    let config = ConnectionConfig {
        heartbeat_interval_ms: 50,
        server_idle_timeout_ms: 100,
        ..fast_config()
    };
    let c = client(addr, config);
    c.manager.connect(identity()).await.unwrap();

    let first = timeout(Duration::from_secs(5), ping_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, json!({"type": "ping"}));
    let second = timeout(Duration::from_secs(5), ping_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, json!({"type": "ping"}));

    c.manager.disconnect().await;
}

#[tokio::test]
async fn backoff_restarts_after_each_successful_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept, then drop the socket straight away, every time.
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            if let Ok(mut ws) = accept_async(stream).await {
                let _ = ws.close(None).await;
            }
        }
    });

    let c = client(addr, fast_config());
    let (statuses, _sub) = record_statuses(&c.store);
    c.manager.connect(identity()).await.unwrap();

    wait_until("three reconnect cycles", || {
        statuses
            .lock()
            .iter()
            .filter(|s| s["state"] == json!("reconnecting"))
            .count()
            >= 3
    })
    .await;
    c.manager.disconnect().await;

    let reconnecting: Vec<Value> = statuses
        .lock()
        .iter()
        .filter(|s| s["state"] == json!("reconnecting"))
        .cloned()
        .collect();
    for status in &reconnecting {
        assert_eq!(status["attempt"], json!(1));
        assert_eq!(status["nextRetryMs"], json!(50));
    }
    assert!(
        statuses
            .lock()
            .iter()
            .any(|s| s["state"] == json!("open"))
    );
}

#[tokio::test]
async fn exhausted_retries_become_unavailable() {
    // Reserve a port and release it so connects are refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConnectionConfig {
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 20,
        max_reconnect_attempts: 3,
        ..fast_config()
    };
    let c = client(addr, config);
    let (statuses, _sub) = record_statuses(&c.store);
    c.manager.connect(identity()).await.unwrap();

    wait_until("unavailable", || {
        ws_state(&c.store).as_deref() == Some("unavailable")
    })
    .await;

    let delays: Vec<Value> = statuses
        .lock()
        .iter()
        .filter(|s| s["state"] == json!("reconnecting"))
        .map(|s| s["nextRetryMs"].clone())
        .collect();
    assert_eq!(delays, vec![json!(10), json!(20), json!(20)]);
    assert!(!c.manager.send(&json!({"type": "ping"})));
    wait_until("unavailable banner", || {
        banner::current(&c.store).map(|b| b.reason) == Some(BannerReason::ChannelUnavailable)
    })
    .await;
    assert!(!c.session_invalid.is_cancelled());

    c.manager.disconnect().await;
    assert_eq!(c.manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_pending_retry() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ConnectionConfig {
        reconnect_base_delay_ms: 300,
        reconnect_max_delay_ms: 300,
        ..fast_config()
    };
    let c = client(addr, config);
    let (statuses, _sub) = record_statuses(&c.store);
    c.manager.connect(identity()).await.unwrap();

    wait_until("reconnecting", || {
        ws_state(&c.store).as_deref() == Some("reconnecting")
    })
    .await;
    c.manager.disconnect().await;
    let closed_at = statuses.lock().len();

    sleep(Duration::from_millis(600)).await;

    let seen = statuses.lock().clone();
    assert_eq!(seen.len(), closed_at, "status changed after disconnect: {seen:?}");
    assert_eq!(seen.last().map(|s| s["state"].clone()), Some(json!("closed")));
    assert_eq!(c.manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn rejected_token_invalidates_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = accept_hdr_async(stream, |_req: &Request, _resp: Response| {
            let mut denied = ErrorResponse::new(Some("invalid token".to_string()));
            *denied.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED;
            Err(denied)
        })
        .await;
    });

    let c = client(addr, fast_config());
    c.manager.connect(identity()).await.unwrap();

    timeout(Duration::from_secs(5), c.session_invalid.cancelled())
        .await
        .expect("session invalidated");
    assert_eq!(c.manager.state(), ConnectionState::Unavailable);
    assert_eq!(c.store.get_state(keys::SESSION_INVALID), Some(json!(true)));
    assert_eq!(c.manager.status().last_error.as_deref(), Some("unauthorized"));
}
