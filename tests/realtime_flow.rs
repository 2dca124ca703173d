//! End-to-end checks for the in-process parts of the engine: the realtime
//! broker, the cache read-through contract and the worker pool lifecycle.
//! Database-backed flows are covered by the env-gated tests inside the lib.

use serde_json::json;
use shelfmark::sync::{Broker, RealtimeMessage};
use shelfmark::worker::{Job, WorkerPool};
use shelfmark::Cache;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn broker_fans_out_to_other_devices_only() {
    let broker = Broker::new(16);
    let mut d1 = broker.register("u-1", "d-1");
    let mut d2 = broker.register("u-1", "d-2");
    let mut d3 = broker.register("u-1", "d-3");

    for rx in [&mut d1, &mut d2, &mut d3] {
        assert_eq!(rx.recv().await.unwrap().kind, "welcome");
    }

    // D1 emits; D2 and D3 receive, D1 never sees its own echo
    let event = RealtimeMessage::sync_event(json!({
        "event_type": "bookmark",
        "resource_id": "b-9",
        "action": "update",
    }));
    assert_eq!(broker.broadcast("u-1", Some("d-1"), &event), 2);

    assert_eq!(d2.recv().await.unwrap().kind, "sync_event");
    assert_eq!(d3.recv().await.unwrap().kind, "sync_event");
    assert!(d1.try_recv().is_err());
}

#[tokio::test]
async fn broker_messages_carry_type_and_timestamp() {
    let broker = Broker::new(16);
    let mut rx = broker.register("u-1", "d-1");

    let before = chrono::Utc::now();
    broker.broadcast("u-1", None, &RealtimeMessage::pong());

    let welcome = rx.recv().await.unwrap();
    let pong = rx.recv().await.unwrap();
    assert_eq!(welcome.kind, "welcome");
    assert_eq!(pong.kind, "pong");
    assert!(pong.timestamp >= before - chrono::Duration::seconds(1));

    // Wire shape: {type, data, timestamp}
    let wire = serde_json::to_value(&pong).unwrap();
    assert!(wire.get("type").is_some());
    assert!(wire.get("data").is_some());
    assert!(wire.get("timestamp").is_some());
}

#[tokio::test]
async fn cache_read_through_skips_second_fetch() {
    let cache = Cache::new();
    let fetches = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let fetches = fetches.clone();
        let value: Vec<i64> = cache
            .get_or_set("recommendations:u-1:all:all", Duration::from_secs(900), || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    // Second read inside the TTL is served from cache
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn worker_pool_executes_submitted_jobs_before_stop_returns() {
    let executed = Arc::new(AtomicUsize::new(0));
    let seen = executed.clone();

    let pool = WorkerPool::start(4, 64, move |_job| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    for bookmark_id in 1..=32 {
        pool.submit(Job::SocialMetricsUpdate {
            bookmark_id,
            action: shelfmark::models::ActionType::View,
        })
        .unwrap();
    }

    pool.stop().await;
    assert_eq!(executed.load(Ordering::SeqCst), 32);
}
