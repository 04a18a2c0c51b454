//! Session against the HTTP remote.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use edsb_board::{BoardConfig, Shift, Slot, SlotTarget, StaticConfig};
use edsb_sync::{
    BoardMemo, BoardSession, BroadcastNotifier, HttpRemote, LocalCache, MemoryCache, SyncClient,
    SyncError, SyncOptions,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, cache: Arc<dyn LocalCache>) -> SyncClient {
    let remote =
        HttpRemote::with_options(&server.uri(), Some("token"), Duration::from_secs(2)).unwrap();
    SyncClient::new(Arc::new(remote), cache, SyncOptions::default())
}

async fn open(client: &SyncClient) -> Result<BoardSession, SyncError> {
    BoardSession::load(
        client.clone(),
        Arc::new(BroadcastNotifier::new()),
        Arc::new(StaticConfig(BoardConfig::from_zone_names(["A", "B"]))),
        BoardMemo::new(),
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        Shift::Night,
    )
    .await
}

#[tokio::test]
async fn loads_legacy_board_and_saves_repaired_copy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kv/active"))
        .and(query_param("date", "2024-01-01"))
        .and(query_param("shift", "night"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": 1,
            "dateISO": "2024-01-01",
            "shift": "night",
            "charge": "n1",
            "zones": {"A": ["n1", "n2"]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/kv/roster"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "n1", "name": "Ann"},
            {"id": "n2", "name": "Bo"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/kv/active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCache::new()));
    let mut session = open(&client).await.unwrap();

    // Duplicate n1 in zone A is dropped; charge keeps the first occurrence.
    assert_eq!(session.board().charge, Some(Slot::new("n1")));
    assert_eq!(session.board().zones["A"], vec![Slot::new("n2")]);
    assert_eq!(session.nurse("n2").name, "Bo");

    session.assign(&SlotTarget::TRIAGE, Slot::new("n3"));
    session.flush().await;

    let posts: Vec<Value> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(posts.len(), 1);
    let saved = &posts[0];
    assert_eq!(saved["version"], 3);
    assert_eq!(saved["triage"]["nurseId"], "n3");
    assert_eq!(saved["zones"]["B"], json!([]));
}

#[tokio::test]
async fn falls_back_to_cache_when_server_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
    cache
        .set(
            "kv:active?date=2024-01-01&shift=night",
            &json!({"dateISO": "2024-01-01", "shift": "night", "zones": {"A": [{"nurseId": "n7"}]}}),
        )
        .unwrap();

    let client = client(&server, cache);
    let session = open(&client).await.unwrap();

    assert_eq!(session.board().zones["A"], vec![Slot::new("n7")]);
    assert!(session.roster().is_empty());
    assert!(session.nurse("n7").placeholder);
}

#[tokio::test]
async fn reports_missing_copy_when_nothing_is_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/kv/active"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server, Arc::new(MemoryCache::new()));
    let err = open(&client).await.unwrap_err();

    assert!(matches!(err, SyncError::NoCachedCopy { ref key, .. } if key == "active"));
}
