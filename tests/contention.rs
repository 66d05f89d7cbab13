//! Multi-handle contention scenarios over one shared store.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use lockset::LockManager;
use lockset::LockOptions;
use lockset::LockSettings;
use lockset::MemoryStore;

fn fast_settings() -> LockSettings {
    LockSettings {
        wait_retry_interval: Duration::from_millis(50),
        ..LockSettings::default()
    }
}

#[tokio::test]
async fn contenders_from_separate_processes_share_one_resource() {
    let store = MemoryStore::new();
    // One manager per simulated process: distinct default identifiers.
    let first = LockManager::with_settings(store.clone(), fast_settings());
    let second = LockManager::with_settings(store, fast_settings());

    let options = LockOptions::default()
        .hold_time(Duration::from_secs(10))
        .wait_time(Duration::ZERO);

    let mut a = first.lock_with("resource", options.clone());
    let mut b = second.lock_with("resource", options.clone());

    // Shared mode: both processes hold at once.
    assert!(a.acquire().await.unwrap());
    assert!(b.acquire().await.unwrap());
    assert!(a.is_locked_by_other());

    // Exclusive mode from a third party is shut out.
    let mut c = second.lock_with(
        "resource",
        LockOptions::exclusive()
            .identifier("c")
            .wait_time(Duration::ZERO),
    );
    assert!(!c.acquire().await.unwrap());

    a.release().await.unwrap();
    b.release().await.unwrap();
    assert!(c.acquire().await.unwrap());
}

#[tokio::test]
async fn nested_acquires_in_one_process_collapse_onto_one_holder() {
    let store = MemoryStore::new();
    let manager = LockManager::with_settings(store, fast_settings());
    let options = LockOptions::exclusive()
        .hold_time(Duration::from_secs(10))
        .wait_time(Duration::ZERO);

    let mut outer = manager.lock_with("job", options.clone());
    let mut inner = manager.lock_with("job", options);

    assert!(outer.acquire().await.unwrap());
    // Same default identifier: the nested acquire lands on the same slot
    // instead of deadlocking against itself.
    assert!(inner.acquire().await.unwrap());

    inner.release().await.unwrap();
    assert!(!outer.is_locked_by_other());
}

#[tokio::test]
async fn exclusive_handover_after_shared_holders_lapse() {
    let store = MemoryStore::new();
    let manager = LockManager::with_settings(store, fast_settings());

    let mut a = manager.lock_with(
        "handover",
        LockOptions::default()
            .identifier("a")
            .hold_time(Duration::from_secs(1))
            .wait_time(Duration::ZERO)
            .release_on_drop(false),
    );
    let mut b = manager.lock_with(
        "handover",
        LockOptions::default()
            .identifier("b")
            .hold_time(Duration::from_secs(2))
            .wait_time(Duration::ZERO)
            .release_on_drop(false),
    );
    let mut d = manager.lock_with(
        "handover",
        LockOptions::exclusive()
            .identifier("d")
            .hold_time(Duration::from_secs(10))
            .wait_time(Duration::from_secs(8)),
    );

    assert!(a.acquire().await.unwrap());
    assert!(b.acquire().await.unwrap());

    let start = Instant::now();
    assert!(d.acquire().await.unwrap());
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn exclusive_contenders_serialize() {
    let store = MemoryStore::new();
    let in_section = Arc::new(AtomicU32::new(0));
    let mut workers = Vec::new();

    for worker in 0..5u32 {
        let store = store.clone();
        let in_section = in_section.clone();
        workers.push(tokio::spawn(async move {
            let manager = LockManager::with_settings(store, fast_settings());
            let mut lock = manager.lock_with(
                "serialized",
                LockOptions::exclusive()
                    .identifier(format!("worker-{worker}"))
                    .hold_time(Duration::from_secs(10))
                    .wait_time(Duration::from_secs(20)),
            );

            assert!(lock.acquire().await.unwrap());
            let concurrent = in_section.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(concurrent, 1, "two exclusive holders at once");
            tokio::time::sleep(Duration::from_millis(20)).await;
            in_section.fetch_sub(1, Ordering::SeqCst);
            lock.release().await.unwrap();
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn refresh_keeps_one_shared_holder_alive() {
    let store = MemoryStore::new();
    let manager = LockManager::with_settings(store, fast_settings());
    let options = LockOptions::default()
        .hold_time(Duration::from_secs(2))
        .wait_time(Duration::ZERO)
        .refresh_threshold(Duration::ZERO)
        .release_on_drop(false);

    let mut a = manager.lock_with(
        "heartbeat",
        options
            .clone()
            .identifier("a")
            .refresh_time(Duration::from_secs(6)),
    );
    let mut b = manager.lock_with("heartbeat", options.clone().identifier("b"));
    let mut c = manager.lock_with("heartbeat", options.identifier("c"));

    assert!(a.acquire().await.unwrap());
    assert!(b.acquire().await.unwrap());
    assert!(c.acquire().await.unwrap());

    assert!(a.refresh().await.unwrap());
    tokio::time::sleep(Duration::from_millis(3100)).await;

    assert!(a.is_locked());
    assert!(!b.is_locked());
    assert!(!c.is_locked());
}
