//! Distributed mutual exclusion over a coordination store.
//!
//! [`LockCoordinator::with_lock`] runs a critical section at most once across
//! every replica holding the same store, per TTL window:
//!
//! 1. Mint a fresh [`OwnerToken`] and issue one atomic set-if-absent-with-expiry.
//! 2. If the key was created, run the closure; otherwise report
//!    [`LockOutcome::NotAcquired`]. A held lock is an expected outcome, not an error.
//! 3. Release with an atomic compare-and-delete, whatever the closure returned.
//!
//! The TTL is a crash-recovery net only. The lock is released as soon as the
//! closure completes; the TTL matters only if the holder dies first.
//!
//! # Degraded Mode
//!
//! Coordination is a liveness optimization here. With no store configured, or
//! when the store errors during acquisition, the closure runs unprotected and a
//! warning is logged. Release errors are logged and left to the TTL.
//!
//! # Example
//!
//! ```rust,ignore
//! let coordinator = LockCoordinator::new(Arc::new(redis_store));
//!
//! let outcome = coordinator
//!     .with_lock("nightly-invoice-run", Duration::from_secs(300), || async {
//!         run_invoices().await
//!     })
//!     .await?;
//!
//! if !outcome.ran() {
//!     tracing::info!("Another replica is running the invoice job");
//! }
//! ```

use crate::metrics::LockMetrics;
use concord_core::lock_store::{CoordinationStore, LockHandle, OwnerToken};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Result of a [`LockCoordinator::with_lock`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The critical section ran and produced a value.
    Ran(T),
    /// Another holder owns the lock; nothing ran.
    NotAcquired,
}

impl<T> LockOutcome<T> {
    /// Whether the critical section ran.
    #[must_use]
    pub const fn ran(&self) -> bool {
        matches!(self, Self::Ran(_))
    }

    /// The value produced by the critical section, if it ran.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Ran(value) => Some(value),
            Self::NotAcquired => None,
        }
    }
}

/// Runs closures under named distributed locks.
///
/// Cheap to clone; clones share the store connection. Holds no client-side
/// lock state: the store is the only arbiter, so concurrent calls for
/// different keys never interact.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Option<Arc<dyn CoordinationStore>>,
    key_prefix: String,
}

impl LockCoordinator {
    /// Coordinate through `store` with the default `lock:` key prefix.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::from_optional(Some(store))
    }

    /// Always run, never lock. For single-instance deployments and local development.
    #[must_use]
    pub fn disabled() -> Self {
        Self::from_optional(None)
    }

    /// Coordinate through `store` if present, else run in degraded mode.
    #[must_use]
    pub fn from_optional(store: Option<Arc<dyn CoordinationStore>>) -> Self {
        if store.is_none() {
            tracing::warn!("No coordination store configured, locks are disabled (single-instance mode)");
        }
        Self {
            store,
            key_prefix: "lock:".to_string(),
        }
    }

    /// Namespace lock keys under `prefix` instead of `lock:`.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Whether a store is configured.
    #[must_use]
    pub fn is_distributed(&self) -> bool {
        self.store.is_some()
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    /// Run `f` if the lock named `key` can be acquired.
    ///
    /// Makes a single acquisition attempt; there is no waiting or queueing.
    /// The lock is released after `f` completes, whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns `f`'s own error, after the release has been attempted. Store
    /// failures never surface here.
    pub async fn with_lock<F, Fut, T, E>(
        &self,
        key: &str,
        ttl: Duration,
        f: F,
    ) -> Result<LockOutcome<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(store) = &self.store else {
            LockMetrics::record_degraded();
            tracing::debug!(lock_key = %key, "Running without lock (no coordination store)");
            return f().await.map(LockOutcome::Ran);
        };

        let handle = LockHandle {
            key: self.store_key(key),
            owner_token: OwnerToken::generate(),
            ttl,
        };

        match store.try_acquire(&handle).await {
            Ok(true) => {
                LockMetrics::record_acquired();
                tracing::debug!(
                    lock_key = %handle.key,
                    ttl_ms = handle.ttl_millis(),
                    "Lock acquired"
                );
            },
            Ok(false) => {
                LockMetrics::record_skipped();
                tracing::debug!(lock_key = %handle.key, "Lock held elsewhere, skipping");
                return Ok(LockOutcome::NotAcquired);
            },
            Err(e) => {
                LockMetrics::record_degraded();
                tracing::warn!(
                    lock_key = %handle.key,
                    error = %e,
                    "Coordination store unavailable, running without lock"
                );
                return f().await.map(LockOutcome::Ran);
            },
        }

        let result = f().await;
        Self::release(store.as_ref(), &handle).await;
        result.map(LockOutcome::Ran)
    }

    async fn release(store: &dyn CoordinationStore, handle: &LockHandle) {
        match store.release(handle).await {
            Ok(true) => {
                tracing::debug!(lock_key = %handle.key, "Lock released");
            },
            Ok(false) => {
                LockMetrics::record_release_failure();
                tracing::warn!(
                    lock_key = %handle.key,
                    ttl_ms = handle.ttl_millis(),
                    "Lock expired or taken over before release, critical section outlived its TTL"
                );
            },
            Err(e) => {
                LockMetrics::record_release_failure();
                tracing::warn!(
                    lock_key = %handle.key,
                    error = %e,
                    "Failed to release lock, relying on TTL"
                );
            },
        }
    }
}
