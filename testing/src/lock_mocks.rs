//! In-memory coordination stores for lock tests.
//!
//! - [`InMemoryCoordinationStore`]: `HashMap`-backed store with real TTL expiry
//! - [`FailingCoordinationStore`]: store whose commands always error
//!
//! Expiry is measured with `tokio::time::Instant`, so tests running with a
//! paused clock can expire locks with `tokio::time::advance`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use concord_core::lock_store::{CoordinationStore, LockHandle, StoreError, StoreFuture};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory coordination store with atomic acquire and compare-and-delete.
///
/// A single mutex makes each operation atomic, standing in for the single
/// arbiter a real store provides. Share one instance (behind an `Arc`) between
/// several coordinators to simulate replicas.
///
/// # Example
///
/// ```
/// use concord_testing::InMemoryCoordinationStore;
/// use concord_core::lock_store::{CoordinationStore, LockHandle};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCoordinationStore::new();
/// let handle = LockHandle::new("lock:job", Duration::from_secs(30));
///
/// assert!(store.try_acquire(&handle).await?);
/// assert!(store.release(&handle).await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCoordinationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held (not expired).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.value_of(key).is_some()
    }

    /// Current value of `key`, if held.
    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_if_absent(&self, handle: &LockHandle) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        if entries.get(&handle.key).is_some_and(|entry| entry.is_live(now)) {
            return false;
        }
        entries.insert(
            handle.key.clone(),
            Entry {
                value: handle.owner_token.to_string(),
                expires_at: now + Duration::from_millis(handle.ttl_millis()),
            },
        );
        true
    }

    fn delete_if_matches(&self, handle: &LockHandle) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let matches = entries
            .get(&handle.key)
            .is_some_and(|entry| entry.is_live(now) && entry.value == handle.owner_token.as_str());
        if matches {
            entries.remove(&handle.key);
        }
        matches
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn try_acquire<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        let acquired = self.set_if_absent(handle);
        Box::pin(async move { Ok(acquired) })
    }

    fn release<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        let released = self.delete_if_matches(handle);
        Box::pin(async move { Ok(released) })
    }
}

/// Coordination store that is always unreachable.
///
/// Exercises the degraded paths: acquisition errors fall back to running,
/// release errors are logged and swallowed.
#[derive(Debug, Default)]
pub struct FailingCoordinationStore {
    acquire_succeeds: bool,
}

impl FailingCoordinationStore {
    /// Every command fails.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            acquire_succeeds: false,
        }
    }

    /// Acquisition succeeds, release fails.
    #[must_use]
    pub const fn failing_release_only() -> Self {
        Self {
            acquire_succeeds: true,
        }
    }
}

impl CoordinationStore for FailingCoordinationStore {
    fn try_acquire<'a>(&'a self, _handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        let acquire_succeeds = self.acquire_succeeds;
        Box::pin(async move {
            if acquire_succeeds {
                Ok(true)
            } else {
                Err(StoreError::ConnectionFailed("connection refused".to_string()))
            }
        })
    }

    fn release<'a>(&'a self, _handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        Box::pin(async { Err(StoreError::ConnectionFailed("connection reset".to_string())) })
    }
}
