//! Lock properties against a real Redis.
//!
//! Ignored by default. Run with a local server:
//!
//! ```bash
//! docker run -d -p 6379:6379 redis:7
//! cargo test -p concord-redis --test live_redis -- --ignored
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use concord_core::lock_store::{CoordinationStore, LockHandle};
use concord_redis::RedisCoordinationStore;
use concord_runtime::LockCoordinator;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_key(name: &str) -> String {
    format!("concord-test:{name}:{}", std::process::id())
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn acquire_is_exclusive_until_release() {
    let store = RedisCoordinationStore::new(&redis_url()).await.expect("redis");
    let key = unique_key("exclusive");
    let a = LockHandle::new(key.clone(), Duration::from_secs(10));
    let b = LockHandle::new(key, Duration::from_secs(10));

    assert!(store.try_acquire(&a).await.unwrap());
    assert!(!store.try_acquire(&b).await.unwrap());
    assert!(store.release(&a).await.unwrap());
    assert!(store.try_acquire(&b).await.unwrap());
    assert!(store.release(&b).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn expired_holder_cannot_release_new_holder() {
    let store = RedisCoordinationStore::new(&redis_url()).await.expect("redis");
    let key = unique_key("takeover");
    let a = LockHandle::new(key.clone(), Duration::from_millis(100));

    assert!(store.try_acquire(&a).await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;

    let b = LockHandle::new(key, Duration::from_secs(10));
    assert!(store.try_acquire(&b).await.unwrap());

    // A's token no longer matches
    assert!(!store.release(&a).await.unwrap());
    assert!(!store.try_acquire(&a).await.unwrap());
    assert!(store.release(&b).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn replicas_never_overlap() {
    let key = unique_key("replicas");
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = RedisCoordinationStore::new(&redis_url()).await.expect("redis");
        let coordinator = LockCoordinator::new(Arc::new(store)).with_key_prefix("");
        let key = key.clone();
        let running = running.clone();
        let max_running = max_running.clone();
        tasks.push(tokio::spawn(async move {
            coordinator
                .with_lock(&key, Duration::from_secs(10), || async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                })
                .await
                .unwrap()
                .ran()
        }));
    }

    let mut ran = 0;
    for task in tasks {
        if task.await.unwrap() {
            ran += 1;
        }
    }

    assert!(ran >= 1);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}
