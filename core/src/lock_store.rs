//! Coordination store abstraction for distributed mutual exclusion.
//!
//! The store is the single arbiter across every process. Both operations it
//! exposes are atomic on the server side:
//!
//! - [`CoordinationStore::try_acquire`]: set the key to the owner token only if
//!   absent, with an expiry (`SET key token NX PX ttl` on Redis)
//! - [`CoordinationStore::release`]: delete the key only if it still holds the
//!   owner token (a server-side script, never read-then-delete on the client)
//!
//! The second guarantee is what keeps a holder whose TTL lapsed from deleting
//! a lock that another holder acquired in the meantime.
//!
//! # Implementations
//!
//! - `RedisCoordinationStore` (concord-redis) - production
//! - `InMemoryCoordinationStore` (concord-testing) - tests

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors surfaced by a coordination store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Store unreachable or the connection dropped.
    #[error("Coordination store connection failed: {0}")]
    ConnectionFailed(String),

    /// The store answered but the command failed.
    #[error("Coordination store command failed: {0}")]
    CommandFailed(String),

    /// No store address configured.
    #[error("Coordination store not configured")]
    NotConfigured,
}

/// Sequence mixed into owner tokens so two attempts in the same nanosecond still differ.
static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Value written to a lock key, identifying one acquisition attempt.
///
/// Format: `{pid}-{unix_nanos}-{sequence}`. Never reused across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    /// Mint a token unique to this process and attempt.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos();
        let sequence = TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{nanos}-{sequence}", std::process::id()))
    }

    /// Token as written to the store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A held lock.
///
/// Created on a successful acquire; gone after release or TTL expiry at the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Fully prefixed store key.
    pub key: String,
    /// Token recorded at acquisition; release only succeeds while the key still holds it.
    pub owner_token: OwnerToken,
    /// Crash-recovery expiry set on the key.
    pub ttl: Duration,
}

impl LockHandle {
    /// Build a handle for a fresh acquisition attempt.
    #[must_use]
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner_token: OwnerToken::generate(),
            ttl,
        }
    }

    /// TTL in whole milliseconds, at least 1 (stores reject a zero expiry).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // TTLs are seconds to minutes
    pub fn ttl_millis(&self) -> u64 {
        (self.ttl.as_millis() as u64).max(1)
    }
}

/// Boxed future returned by [`CoordinationStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Atomic lock primitives on an external ordered key-value store.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the coordinator can hold an
/// `Arc<dyn CoordinationStore>` chosen at startup.
pub trait CoordinationStore: Send + Sync {
    /// Set `handle.key` to `handle.owner_token` with `handle.ttl` expiry if the key is absent.
    ///
    /// Returns `true` when this call created the key. That single atomic result
    /// is the only acquisition signal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached or rejects the command.
    fn try_acquire<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool>;

    /// Delete `handle.key` only if its value still equals `handle.owner_token`.
    ///
    /// Returns `true` when the key was deleted, `false` when it had already
    /// expired or belongs to another holder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be reached or rejects the command.
    fn release<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool>;
}
