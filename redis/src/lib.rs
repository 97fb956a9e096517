//! Redis coordination store for distributed locks.
//!
//! [`RedisCoordinationStore`] implements [`CoordinationStore`] with the two
//! atomic primitives a lock needs:
//!
//! - **Acquire**: `SET key token NX PX ttl`, one round-trip that creates the
//!   key only if absent and attaches the expiry in the same command
//! - **Release**: a Lua compare-and-delete that removes the key only while it
//!   still holds the caller's token
//!
//! A plain `DEL` on release would let a holder whose TTL already expired
//! delete a lock that a different holder has since acquired. The script runs
//! atomically on the server, so no other command can interleave between the
//! compare and the delete.
//!
//! # Connection Handling
//!
//! Commands go through a [`ConnectionManager`], which reconnects on its own
//! after a dropped connection. Clones share the manager.
//!
//! # Example
//!
//! ```no_run
//! use concord_redis::RedisCoordinationStore;
//! use concord_runtime::LockCoordinator;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCoordinationStore::new("redis://127.0.0.1:6379").await?;
//! let locks = LockCoordinator::new(Arc::new(store));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use concord_core::lock_store::{CoordinationStore, LockHandle, StoreError, StoreFuture};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};

const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
";

/// `Redis`-backed coordination store.
///
/// # Thread Safety
///
/// This type is `Clone` and can be shared across tasks. Each clone shares the
/// same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    conn_manager: ConnectionManager,
    release_script: Script,
}

impl RedisCoordinationStore {
    /// Connect to `Redis`.
    ///
    /// # Connection URL Format
    ///
    /// - TCP: `redis://[:password@]host[:port][/database]`
    /// - TLS: `rediss://[:password@]host[:port][/database]`
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotConfigured`] if the URL is blank
    /// - [`StoreError::ConnectionFailed`] if the URL is malformed or the
    ///   server cannot be reached
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        if redis_url.trim().is_empty() {
            return Err(StoreError::NotConfigured);
        }

        let client = Client::open(redis_url).map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisCoordinationStore initialized successfully");

        Ok(Self {
            conn_manager,
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn set_if_absent(&self, handle: &LockHandle) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();

        // Nil reply means the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(&handle.key)
            .arg(handle.owner_token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(handle.ttl_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| classify(&e, "Failed to acquire lock"))?;

        Ok(reply.is_some())
    }

    async fn delete_if_matches(&self, handle: &LockHandle) -> Result<bool, StoreError> {
        let mut conn = self.conn_manager.clone();

        let deleted: i64 = self
            .release_script
            .key(&handle.key)
            .arg(handle.owner_token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| classify(&e, "Failed to release lock"))?;

        Ok(deleted == 1)
    }
}

impl CoordinationStore for RedisCoordinationStore {
    fn try_acquire<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        Box::pin(self.set_if_absent(handle))
    }

    fn release<'a>(&'a self, handle: &'a LockHandle) -> StoreFuture<'a, bool> {
        Box::pin(self.delete_if_matches(handle))
    }
}

fn classify(error: &RedisError, context: &str) -> StoreError {
    if error.is_io_error() || error.is_connection_dropped() || error.is_connection_refusal() {
        StoreError::ConnectionFailed(format!("{context}: {error}"))
    } else {
        StoreError::CommandFailed(format!("{context}: {error}"))
    }
}
