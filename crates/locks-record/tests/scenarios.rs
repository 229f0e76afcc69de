use std::time::Duration;

use assert_matches::assert_matches;
use distlock::{Error, LockConfig, LockStatus, Locker, TokioClock};
use distlock_record::{MemoryRecordStore, RecordLocker, RecordStore, SqlRecordStore};

fn config(owner: &str, clock: TokioClock) -> LockConfig {
    LockConfig::new("billing")
        .with_owner_id(owner)
        .with_timeout(Duration::from_secs(2))
        .with_clock(clock)
}

async fn sql_store() -> SqlRecordStore {
    let store = SqlRecordStore::connect(":memory:").await.unwrap();
    store.ensure_schema().await.unwrap();
    store
}

fn boxed<S: RecordStore + Clone>(store: &S, owner: &str, clock: TokioClock) -> Box<dyn Locker> {
    Box::new(
        RecordLocker::new(store.clone())
            .into_lock(config(owner, clock))
            .unwrap(),
    )
}

async fn pairs(clock: TokioClock) -> Vec<(Box<dyn Locker>, Box<dyn Locker>)> {
    let memory = MemoryRecordStore::new();
    let sql = sql_store().await;

    vec![
        (boxed(&memory, "node-a", clock), boxed(&memory, "node-b", clock)),
        (boxed(&sql, "node-a", clock), boxed(&sql, "node-b", clock)),
    ]
}

#[tokio::test(start_paused = true)]
async fn handover_after_unlock() {
    let clock = TokioClock::new();

    for (a, b) in pairs(clock).await {
        a.lock().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_matches!(b.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-a");

        tokio::time::sleep(Duration::from_secs(1)).await;
        a.unlock().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        b.lock().await.unwrap();
        assert_eq!(a.status().await.unwrap(), LockStatus::HeldByOther("node-b".into()));

        b.unlock().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_lock_has_one_winner() {
    let clock = TokioClock::new();

    for (a, b) in pairs(clock).await {
        let (first, second) = tokio::join!(a.lock(), b.lock());

        assert_ne!(first.is_ok(), second.is_ok());
        assert!(first.err().or(second.err()).unwrap().is_conflict());
    }
}

#[tokio::test(start_paused = true)]
async fn lost_lock_is_contended_again() {
    let clock = TokioClock::new();
    let store = MemoryRecordStore::new();
    let a = boxed(&store, "node-a", clock);
    let b = boxed(&store, "node-b", clock);

    a.lock().await.unwrap();
    store.disconnect();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    store.reconnect();
    b.lock().await.unwrap();

    assert_matches!(a.renew().await, Err(Error::NotHeld { .. }));
    assert_matches!(a.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-b");
    assert_eq!(store.find("billing").await.unwrap().unwrap().owner_id, "node-b");
}

#[tokio::test(start_paused = true)]
async fn unlock_is_retried_after_transport_failure() {
    let clock = TokioClock::new();
    let store = MemoryRecordStore::new();
    let a = boxed(&store, "node-a", clock);
    let b = boxed(&store, "node-b", clock);

    a.lock().await.unwrap();

    store.disconnect();
    assert!(a.unlock().await.unwrap_err().is_transport());
    store.reconnect();

    a.unlock().await.unwrap();
    assert!(store.find("billing").await.unwrap().is_none());
    b.lock().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_record_is_reclaimed_after_expiry() {
    let clock = TokioClock::new();

    for (a, b) in pairs(clock).await {
        a.lock().await.unwrap();
        drop(a);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_matches!(b.lock().await, Err(Error::Conflict { .. }));

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        b.lock().await.unwrap();
        assert_eq!(b.status().await.unwrap(), LockStatus::HeldBySelf);

        b.unlock().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn renewal_moves_expiry_forward() {
    let clock = TokioClock::new();
    let store = sql_store().await;
    let a = RecordLocker::new(store.clone())
        .into_lock(config("node-a", clock))
        .unwrap();

    a.lock().await.unwrap();
    let mut last = store.find("billing").await.unwrap().unwrap().expired_at;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        let next = store.find("billing").await.unwrap().unwrap().expired_at;
        assert!(next > last);
        last = next;
    }

    a.unlock().await.unwrap();
    assert!(store.find("billing").await.unwrap().is_none());
}
