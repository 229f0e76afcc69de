use std::time::Duration;

use assert_matches::assert_matches;
use distlock::{Error, LockConfig, LockStatus, Locker, TokioClock};
use distlock_session::{
    EphemeralLocker, MemoryEnsemble, MemorySessionAgent, SessionLock, SessionLocker,
};

fn session_lock(
    agent: &MemorySessionAgent,
    clock: TokioClock,
    owner: &str,
) -> SessionLock<MemorySessionAgent> {
    SessionLocker::new(agent.clone())
        .into_lock(
            LockConfig::new("leader")
                .with_owner_id(owner)
                .with_timeout(Duration::from_secs(2))
                .with_clock(clock),
        )
        .unwrap()
}

fn config(owner: &str) -> LockConfig {
    LockConfig::new("leader").with_owner_id(owner)
}

#[tokio::test(start_paused = true)]
async fn session_handover_after_unlock() {
    let clock = TokioClock::new();
    let agent = MemorySessionAgent::with_clock(clock);
    let a = session_lock(&agent, clock, "node-a");
    let b = session_lock(&agent, clock, "node-b");

    a.lock().await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_matches!(b.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-a");

    tokio::time::sleep(Duration::from_secs(1)).await;
    a.unlock().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    b.lock().await.unwrap();
    assert_eq!(
        a.status().await.unwrap(),
        LockStatus::HeldByOther("node-b".into())
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_session_lock_has_one_winner() {
    let clock = TokioClock::new();
    let agent = MemorySessionAgent::with_clock(clock);
    let a = session_lock(&agent, clock, "node-a");
    let b = session_lock(&agent, clock, "node-b");

    let (first, second) = tokio::join!(a.lock(), b.lock());

    assert_ne!(first.is_ok(), second.is_ok());
    assert!(first.err().or(second.err()).unwrap().is_conflict());
    assert_eq!(agent.session_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn crashed_session_holder_is_reclaimed() {
    let clock = TokioClock::new();
    let agent = MemorySessionAgent::with_clock(clock);
    let a = session_lock(&agent, clock, "node-a");
    let b = session_lock(&agent, clock, "node-b");

    a.lock().await.unwrap();
    drop(a);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_matches!(b.lock().await, Err(Error::Conflict { .. }));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    b.lock().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lost_session_lock_is_contended_again() {
    let clock = TokioClock::new();
    let agent = MemorySessionAgent::with_clock(clock);
    let a = session_lock(&agent, clock, "node-a");
    let b = session_lock(&agent, clock, "node-b");

    a.lock().await.unwrap();
    agent.disconnect();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    agent.reconnect();
    b.lock().await.unwrap();

    assert_matches!(a.renew().await, Err(Error::NotHeld { .. }));
    assert_matches!(a.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-b");
    assert_eq!(b.status().await.unwrap(), LockStatus::HeldBySelf);
}

#[tokio::test(start_paused = true)]
async fn session_unlock_is_retried_after_transport_failure() {
    let clock = TokioClock::new();
    let agent = MemorySessionAgent::with_clock(clock);
    let a = session_lock(&agent, clock, "node-a");
    let b = session_lock(&agent, clock, "node-b");

    a.lock().await.unwrap();

    agent.disconnect();
    assert!(a.unlock().await.unwrap_err().is_transport());
    agent.reconnect();

    a.unlock().await.unwrap();
    assert_eq!(agent.session_count().await, 0);
    b.lock().await.unwrap();
}

#[tokio::test]
async fn ephemeral_handover_after_crash() {
    let ensemble = MemoryEnsemble::new();
    let crashed = ensemble.connect();

    let a = EphemeralLocker::new(crashed.clone())
        .into_lock(config("node-a"))
        .unwrap();
    let b = EphemeralLocker::new(ensemble.connect())
        .into_lock(config("node-b"))
        .unwrap();

    a.lock().await.unwrap();
    assert_matches!(b.lock().await, Err(Error::Conflict { .. }));

    crashed.close().await;

    b.lock().await.unwrap();
    assert!(a.renew().await.unwrap_err().is_transport());
}

#[tokio::test]
async fn concurrent_ephemeral_lock_has_one_winner() {
    let ensemble = MemoryEnsemble::new();
    let a = EphemeralLocker::new(ensemble.connect())
        .into_lock(config("node-a"))
        .unwrap();
    let b = EphemeralLocker::new(ensemble.connect())
        .into_lock(config("node-b"))
        .unwrap();

    let (first, second) = tokio::join!(a.lock(), b.lock());

    assert_ne!(first.is_ok(), second.is_ok());
    assert!(first.err().or(second.err()).unwrap().is_conflict());
}

#[tokio::test]
async fn ephemeral_unlock_is_retried_after_connection_loss() {
    let ensemble = MemoryEnsemble::new();
    let client = ensemble.connect();
    let a = EphemeralLocker::new(client.clone())
        .into_lock(config("node-a"))
        .unwrap();
    let b = EphemeralLocker::new(ensemble.connect())
        .into_lock(config("node-b"))
        .unwrap();

    a.lock().await.unwrap();

    client.disconnect();
    assert!(a.unlock().await.unwrap_err().is_transport());
    client.reconnect();

    // The session is still alive, so only a second release frees the node.
    assert_matches!(b.lock().await, Err(Error::Conflict { owner, .. }) if owner == "node-a");
    a.unlock().await.unwrap();
    b.lock().await.unwrap();
}
