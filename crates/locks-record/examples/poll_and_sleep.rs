//! Two workers taking turns on one lock stored in a libsql database.
//!
//! Each worker waits for the lock with `lock_with_retry`, holds it while it
//! works, then releases it. Pass a database path to share the lock with
//! other processes; the default is a private in-memory database.

use std::time::Duration;

use distlock::{LockConfig, Locker, RetryPolicy, lock_with_retry};
use distlock_record::{RecordLocker, SqlRecordStore};
use tracing::info;

const ROUNDS: usize = 3;

async fn worker(store: SqlRecordStore, owner: &str) -> Result<(), distlock::Error> {
    let lock = RecordLocker::new(store).into_lock(
        LockConfig::new("nightly-report")
            .with_owner_id(owner)
            .with_timeout(Duration::from_secs(5)),
    )?;
    let policy = RetryPolicy {
        initial_delay: Duration::from_millis(200),
        max_wait: Some(Duration::from_secs(30)),
        ..RetryPolicy::default()
    };

    for round in 1..=ROUNDS {
        lock_with_retry(&lock, &policy).await?;
        info!(owner, round, "holding the lock");

        tokio::time::sleep(Duration::from_millis(750)).await;

        lock.unlock().await?;
        info!(owner, round, "released the lock");

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| ":memory:".to_string());
    let store = SqlRecordStore::connect(path).await?;
    store.ensure_schema().await?;

    let (first, second) = tokio::join!(
        worker(store.clone(), "worker-a"),
        worker(store.clone(), "worker-b"),
    );
    first?;
    second?;

    Ok(())
}
