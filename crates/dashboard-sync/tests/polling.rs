use std::time::Duration;

use dashboard_state::{Reconciler, StatusBucket, StatusIndex, Store, keys};
use dashboard_sync::banner::{self, BannerReason};
use dashboard_sync::{ApiClient, Poller, Resource, SyncConfig, SyncError};
use pretty_assertions::assert_eq;
use serde_json::json;
use telemetry::SecretString;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    store: Store,
    poller: Poller,
    session_invalid: CancellationToken,
}

fn harness(server: &MockServer, interval_ms: u64) -> Harness {
    telemetry::init_test();
    let mut config = SyncConfig {
        api_base_url: format!("{}/api", server.uri()),
        request_timeout_ms: 500,
        ..SyncConfig::default()
    };
    config.polling.interval_ms = interval_ms;

    let store = Store::new();
    let session_invalid = CancellationToken::new();
    let api = ApiClient::new(&config, SecretString::from("t")).unwrap();
    let poller = Poller::new(
        api,
        Reconciler::new(store.clone()),
        config.polling.clone(),
        session_invalid.clone(),
    );
    Harness {
        store,
        poller,
        session_invalid,
    }
}

async fn mount_all(server: &MockServer) {
    let bodies = [
        (
            "/api/dashboard/summary",
            json!({"totalApplications": 2, "statusBreakdown": {"pending": 1, "approved": 1}}),
        ),
        (
            "/api/applications",
            json!([
                {"id": "a-1", "status": "PENDING"},
                {"id": "a-2", "status": "approved"}
            ]),
        ),
        ("/api/queue", json!([{"applicationId": "a-1"}])),
        ("/api/sla/analytics", json!({"onTrack": 2})),
        ("/api/investor/metrics", json!({"fundedVolume": 0})),
    ];
    for (route, body) in bodies {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn refresh_replaces_slices_and_rebuilds_status_index() {
    let server = MockServer::start().await;
    mount_all(&server).await;
    let h = harness(&server, 30_000);
    h.store
        .set_state(keys::APPLICATION_STATUSES, json!({"stale": "funded"}));

    let report = h.poller.refresh().await.unwrap();
    assert_eq!(report.refreshed.len(), Resource::ALL.len());
    assert!(!report.is_demo());

    let index: StatusIndex = h.store.get_as(keys::APPLICATION_STATUSES).unwrap();
    let expected: StatusIndex = [
        ("a-1".to_string(), StatusBucket::Pending),
        ("a-2".to_string(), StatusBucket::Approved),
    ]
    .into_iter()
    .collect();
    assert_eq!(index, expected);

    assert_eq!(
        h.store.get_state(keys::QUEUE),
        Some(json!({"items": [{"applicationId": "a-1"}], "isDemo": false}))
    );
    assert_eq!(h.store.get_state(keys::SLA_ANALYTICS).unwrap()["onTrack"], json!(2));
    assert_eq!(banner::current(&h.store), None);
}

#[tokio::test]
async fn unreachable_backend_yields_demo_slices_and_banner() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let h = harness(&server, 30_000);

    let report = h.poller.refresh().await.expect("demo fallback never errors");
    assert_eq!(report.demo.len(), Resource::ALL.len());

    for resource in Resource::ALL {
        let slice = h.store.get_state(resource.store_key()).unwrap();
        assert_eq!(slice["isDemo"], json!(true), "{resource}");
    }
    assert_eq!(
        banner::current(&h.store).map(|b| b.reason),
        Some(BannerReason::DemoData)
    );
}

#[tokio::test]
async fn unauthorized_refresh_invalidates_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let h = harness(&server, 30_000);

    let err = h.poller.refresh().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
    assert!(h.session_invalid.is_cancelled());
    assert_eq!(h.store.get_state(keys::SESSION_INVALID), Some(json!(true)));
    assert_eq!(h.store.get_state(keys::DASHBOARD_SUMMARY), None);
}

#[tokio::test]
async fn unavailable_channel_triggers_immediate_refresh() {
    let server = MockServer::start().await;
    mount_all(&server).await;
    let h = harness(&server, 60_000);
    let _watch = h.poller.watch_connection();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(h.poller.clone().run(cancel.clone()));

    h.store.set_state(
        keys::WS_STATUS,
        json!({"state": "unavailable", "attempt": 5, "lastPongAt": null, "lastError": "refused"}),
    );

    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.store.get_state(keys::DASHBOARD_SUMMARY).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(refreshed.is_ok(), "refresh did not run after channel became unavailable");

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn run_stops_when_session_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let h = harness(&server, 20);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        h.poller.clone().run(CancellationToken::new()),
    )
    .await
    .expect("poller stops on its own");
    assert!(matches!(result, Err(SyncError::Unauthorized)));
    assert!(h.session_invalid.is_cancelled());
    assert_eq!(
        banner::current(&h.store).map(|b| b.reason),
        Some(BannerReason::SessionExpired)
    );
}
