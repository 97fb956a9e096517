//! # Concord Testing
//!
//! In-memory infrastructure for testing code built on the Concord
//! coordination layer without a running Redis or Redpanda.
//!
//! This crate provides:
//! - [`InMemoryCoordinationStore`]: atomic set-if-absent with TTL expiry and
//!   compare-and-delete release
//! - [`FailingCoordinationStore`]: an unreachable store for degraded-mode tests
//! - [`InMemoryTopicExchange`]: a topic exchange with `*`/`#` bindings, a
//!   bounded channel buffer and a manual drain
//! - [`init_test_tracing`]: log capture for tests
//!
//! ## Example
//!
//! ```ignore
//! use concord_runtime::LockCoordinator;
//! use concord_testing::InMemoryCoordinationStore;
//!
//! #[tokio::test]
//! async fn only_one_replica_runs() {
//!     let store = Arc::new(InMemoryCoordinationStore::new());
//!     let a = LockCoordinator::new(store.clone());
//!     let b = LockCoordinator::new(store);
//!     // ...
//! }
//! ```

mod exchange_mocks;
mod lock_mocks;

pub use exchange_mocks::{DeliveredMessage, InMemoryTopicExchange};
pub use lock_mocks::{FailingCoordinationStore, InMemoryCoordinationStore};

/// Install a test subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
