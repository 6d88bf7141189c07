// tests/store_roundtrip.rs
//
// Persistence across process restarts: everything written before a close
// must read back identically after reopening the same file.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use vigil::insight::{Insight, Priority, Snapshot};
use vigil::store::Store;

#[test]
fn snapshots_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vigil.db");

    {
        let store = Store::open(&path).unwrap();
        store
            .save_snapshot(&Snapshot::new(
                "health",
                json!({"sleep_score": 78.0, "steps": 10234}),
            ))
            .unwrap();
        store
            .save_snapshot(&Snapshot::new("weather", json!({"temp_c": 19.5})))
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let snap = store.latest_snapshot("health").unwrap().unwrap();
    assert_eq!(snap.source, "health");
    assert_eq!(snap.payload["steps"], json!(10234));
    assert!(store.latest_snapshot("calendar").unwrap().is_none());
}

#[test]
fn insights_and_delivery_state_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vigil.db");

    let id = {
        let store = Store::open(&path).unwrap();
        let insight = Insight::new(
            "threshold",
            "infra",
            Priority::High,
            "Disk almost full",
            "web disk at 97%",
        )
        .with_dedupe_key("thr:disk_used:critical:web")
        .with_data(json!({"value": 97.0}));
        let id = store.save_insight(&insight).unwrap();
        store.mark_delivered(id).unwrap();
        id
    };

    let store = Store::open(&path).unwrap();
    let loaded = store.get_insight(id).unwrap().unwrap();
    assert!(loaded.delivered);
    assert_eq!(loaded.priority, Priority::High);
    assert_eq!(
        loaded.dedupe_key.as_deref(),
        Some("thr:disk_used:critical:web")
    );
    // Delivered insights no longer count as pending.
    assert!(store.undelivered_since(24.0, 10).unwrap().is_empty());
    // And the dedup window still sees the delivery.
    assert!(store
        .check_duplicate("thr:disk_used:critical:web", 4.0)
        .unwrap());
}

#[test]
fn budget_rows_survive_reopen_and_roll_by_date() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vigil.db");
    let today = NaiveDate::from_ymd_opt(2025, 9, 6).unwrap();
    let tomorrow = NaiveDate::from_ymd_opt(2025, 9, 7).unwrap();

    {
        let store = Store::open(&path).unwrap();
        // No prior budget read: the first increment creates the day's row.
        store.increment_budget(today, 1, 5).unwrap();
        store.increment_budget(today, 2, 5).unwrap();
    }

    let store = Store::open(&path).unwrap();
    let b = store.today_budget(today, 5).unwrap();
    assert_eq!(b.count, 2);
    assert_eq!(b.consumed_insight_ids, vec![1, 2]);
    // A new date starts from zero.
    let b2 = store.today_budget(tomorrow, 5).unwrap();
    assert_eq!(b2.count, 0);
    assert_eq!(b2.remaining(), 5);
}

#[test]
fn retention_sweep_only_touches_snapshots() {
    let store = Store::open_in_memory().unwrap();
    let mut old = Snapshot::new("health", json!({"sleep_score": 70.0}));
    old.captured_at = Utc::now() - chrono::Duration::days(45);
    store.save_snapshot(&old).unwrap();
    store
        .save_snapshot(&Snapshot::new("health", json!({"sleep_score": 82.0})))
        .unwrap();
    let insight = Insight::new("trend", "infra", Priority::Medium, "t", "m");
    let id = store.save_insight(&insight).unwrap();

    let removed = store.cleanup_old_snapshots(30).unwrap();
    assert_eq!(removed, 1);
    assert!(store.latest_snapshot("health").unwrap().is_some());
    assert!(store.get_insight(id).unwrap().is_some());
}
