//! # Concord Core
//!
//! Shared types and trait seams for the Concord inter-service coordination layer.
//!
//! This crate owns no I/O. It defines the vocabulary the three coordination
//! components speak and the traits that external infrastructure adapters
//! implement:
//!
//! - **[`lock_store::CoordinationStore`]**: atomic set-if-absent and
//!   compare-and-delete against an ordered key-value store
//! - **[`exchange::ExchangeChannel`]**: a buffered, topic-routed broker channel
//!   with a drain signal for backpressure
//! - **[`correlation::CorrelationId`]**: the identifier forwarded across every hop
//! - **[`routing::RoutingKey`]**: dot-segmented event identifiers with
//!   topic-exchange pattern matching
//! - **[`response`]**: response envelope unwrapping and schema validation modes
//! - **[`config`]**: explicit configuration structs loaded from the environment
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//!   │ LockCoordinator  │  │  EventPublisher  │  │    RpcClient     │
//!   └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘
//!            │                     │                     │
//!   CoordinationStore       ExchangeChannel          reqwest
//!            │                     │                     │
//!            ▼                     ▼                     ▼
//!         Redis                 Redpanda          Downstream peer
//! ```
//!
//! The components never depend on each other; a calling service composes them.

pub mod config;
pub mod correlation;
pub mod event;
pub mod exchange;
pub mod lock_store;
pub mod response;
pub mod routing;

pub use correlation::CorrelationId;
pub use event::EventEnvelope;
pub use routing::RoutingKey;
