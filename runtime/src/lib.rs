//! # Concord Runtime
//!
//! Client-side coordination logic for horizontally replicated services.
//!
//! ## Components
//!
//! - **[`LockCoordinator`]**: run a critical section on at most one replica,
//!   with atomic acquire and compare-and-delete release
//! - **[`EventPublisher`]**: fire-and-forget, topic-routed, durable event
//!   dispatch that waits out a full channel buffer instead of dropping
//! - **[`retry`]**: bounded retry with a non-decreasing backoff schedule
//! - **[`metrics`]**: counters for every coordination decision
//!
//! Each component takes its infrastructure as an injected trait object from
//! `concord-core`, so the same code runs against Redis and Redpanda in
//! production and against in-memory doubles in tests.
//!
//! ## Example
//!
//! ```ignore
//! use concord_runtime::{EventPublisher, LockCoordinator};
//!
//! let ran = locks
//!     .with_lock("reports:daily", Duration::from_secs(120), || async {
//!         let report = build_report().await?;
//!         events.publish("reports.daily.completed", &report).await
//!     })
//!     .await?
//!     .ran();
//! ```

/// Distributed mutual exclusion
pub mod lock;

/// Topic-routed event publishing
pub mod publisher;

/// Retry with a backoff schedule
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use lock::{LockCoordinator, LockOutcome};
pub use publisher::EventPublisher;
pub use retry::{RetryPolicy, retry_with_predicate};
