//! End-to-end offline behaviour through the public API.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use edsb_board::{BoardConfig, Shift, Slot, SlotTarget, StaticConfig};
use edsb_sync::session::ACTIVE_KEY;
use edsb_sync::{
    board_params, BoardMemo, BoardSession, BroadcastNotifier, FileCache, LocalCache, MockRemote,
    Params, SaveOutcome, SyncClient, SyncNotice, SyncOptions,
};
use serde_json::json;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

async fn session(client: &SyncClient, memo: BoardMemo) -> BoardSession {
    BoardSession::load(
        client.clone(),
        Arc::new(BroadcastNotifier::new()),
        Arc::new(StaticConfig(BoardConfig::from_zone_names(["A", "B"]))),
        memo,
        date(),
        Shift::Day,
    )
    .await
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn edits_made_offline_survive_restart_and_sync() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MockRemote::new());
    let params = board_params(date(), Shift::Day);

    {
        let cache: Arc<dyn LocalCache> = Arc::new(FileCache::open(dir.path()).unwrap());
        let client = SyncClient::new(remote.clone(), cache, SyncOptions::default());
        let mut board = session(&client, BoardMemo::new()).await;

        remote.set_offline(true);
        board.assign(&SlotTarget::CHARGE, Slot::new("n1"));
        board.assign(&SlotTarget::zone("A"), Slot::new("n2"));
        board.set_comments("ambulance diversion until 14:00");

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(client.queue_len(), 1);
        assert!(remote.stored(ACTIVE_KEY, &params).is_none());
    }

    // Fresh process: same cache directory, server back.
    remote.set_offline(false);
    let cache: Arc<dyn LocalCache> = Arc::new(FileCache::open(dir.path()).unwrap());
    let client = SyncClient::new(remote.clone(), cache, SyncOptions::default());
    assert_eq!(client.restore_queue().unwrap(), 1);

    let report = client.flush_queue().await;
    assert_eq!(report.flushed, 1);

    let stored = remote.stored(ACTIVE_KEY, &params).unwrap();
    assert_eq!(stored["charge"]["nurseId"], "n1");
    assert_eq!(stored["zones"]["A"][0]["nurseId"], "n2");
    assert_eq!(stored["comments"], "ambulance diversion until 14:00");

    let reloaded = session(&client, BoardMemo::new()).await;
    assert_eq!(reloaded.board().comments, "ambulance diversion until 14:00");
}

#[tokio::test]
async fn queue_retries_only_the_head() {
    let remote = Arc::new(MockRemote::new());
    let cache: Arc<dyn LocalCache> = Arc::new(edsb_sync::MemoryCache::new());
    let client = SyncClient::new(remote.clone(), cache, SyncOptions::default());

    remote.set_offline(true);
    for n in 1..=3 {
        let outcome = client
            .save("config", &json!({"rev": n}), &Params::new())
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Queued);
    }
    remote.set_offline(false);

    remote.script_saves([false]);
    let report = client.flush_queue().await;
    assert_eq!((report.flushed, report.remaining), (0, 3));

    let report = client.flush_queue().await;
    assert_eq!((report.flushed, report.remaining), (3, 0));

    let attempted: Vec<_> = remote.saves().into_iter().map(|s| s.payload["rev"].clone()).collect();
    // Every attempt before the successful flush went to rev 1.
    assert_eq!(
        attempted,
        vec![json!(1), json!(1), json!(1), json!(1), json!(1), json!(2), json!(3)]
    );
}

#[tokio::test]
async fn moving_charge_nurse_into_zone_is_reported() {
    let remote = Arc::new(MockRemote::new());
    let cache: Arc<dyn LocalCache> = Arc::new(edsb_sync::MemoryCache::new());
    let client = SyncClient::new(remote, cache, SyncOptions::default());
    let mut notices = client.subscribe_notices();
    let mut board = session(&client, BoardMemo::new()).await;

    board.assign(&SlotTarget::CHARGE, Slot::new("n1"));
    let moved = board.assign(&SlotTarget::zone("A"), Slot::new("n1"));

    assert!(moved);
    assert!(board.board().charge.is_none());
    assert_eq!(board.board().zones["A"], vec![Slot::new("n1")]);
    assert!(board.board().zones["B"].is_empty());
    assert_eq!(
        notices.recv().await.unwrap(),
        SyncNotice::PriorAssignmentCleared {
            nurse_id: "n1".to_string()
        }
    );
}
