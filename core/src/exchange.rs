//! Topic exchange channel abstraction for event publishing.
//!
//! The publisher writes to a single configured topic exchange and never
//! addresses a queue. The exchange fans each message out to every queue whose
//! binding pattern matches the routing key; which consumers exist is invisible
//! from this side.
//!
//! # Backpressure
//!
//! A channel has a finite internal buffer. [`ExchangeChannel::try_publish`]
//! reports [`TryPublishError::BufferFull`] instead of blocking, and the channel
//! advances its [`DrainSignal`] whenever buffered sends are acknowledged. A
//! caller that subscribes to the signal *before* attempting a send can wait on
//! it without missing a wakeup:
//!
//! ```rust,ignore
//! let mut drained = channel.drain_signal();
//! loop {
//!     match channel.try_publish(exchange, &envelope) {
//!         Ok(ack) => return ack.await,
//!         Err(TryPublishError::BufferFull) => drained.changed().await?,
//!         Err(TryPublishError::Failed(e)) => return Err(e),
//!     }
//! }
//! ```
//!
//! # Implementations
//!
//! - `RedpandaExchange` (concord-redpanda) - production
//! - `InMemoryTopicExchange` (concord-testing) - tests

use crate::event::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that can occur while handing an event to the broker.
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Could not establish the broker connection.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// No channel is available (broker not configured, connection closed, or shut down).
    #[error("Broker channel unavailable for exchange '{exchange}'")]
    ChannelUnavailable {
        /// Exchange the publish targeted
        exchange: String,
    },

    /// The broker refused or failed to acknowledge the message.
    #[error("Broker rejected message for '{routing_key}': {reason}")]
    Rejected {
        /// Routing key of the rejected message
        routing_key: String,
        /// Broker-side reason
        reason: String,
    },

    /// The payload could not be serialized.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// The routing key is malformed.
    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),
}

/// Outcome of a non-blocking publish attempt.
#[derive(Error, Debug, Clone)]
pub enum TryPublishError {
    /// The channel buffer is full; wait for the drain signal and try again.
    #[error("Channel buffer full")]
    BufferFull,

    /// The attempt failed for a reason waiting will not fix.
    #[error(transparent)]
    Failed(#[from] ExchangeError),
}

/// Resolves once the broker has accepted the message for routing.
pub type AckFuture = Pin<Box<dyn Future<Output = Result<(), ExchangeError>> + Send>>;

/// A buffered channel to a topic exchange.
///
/// # Thread Safety
///
/// Implementations are shared across tasks behind an `Arc`. The buffer is the
/// only point of contention; concurrent callers coordinate through the drain
/// signal.
pub trait ExchangeChannel: Send + Sync {
    /// Hand `envelope` to `exchange` without waiting for buffer space.
    ///
    /// On success the returned future resolves when the broker has accepted
    /// the message, not when any consumer has processed it.
    ///
    /// # Errors
    ///
    /// Returns [`TryPublishError::BufferFull`] when the buffer is at capacity,
    /// or [`TryPublishError::Failed`] for connection-level failures.
    fn try_publish(
        &self,
        exchange: &str,
        envelope: &EventEnvelope,
    ) -> Result<AckFuture, TryPublishError>;

    /// Subscribe to buffer drain notifications.
    ///
    /// The receiver's value changes every time buffered sends are acknowledged.
    /// A closed receiver means the channel is gone.
    fn drain_signal(&self) -> watch::Receiver<u64>;
}

/// Generation counter advanced whenever a channel's buffer drains.
#[derive(Debug)]
pub struct DrainSignal {
    generation: watch::Sender<u64>,
}

impl DrainSignal {
    /// Create a signal at generation zero.
    #[must_use]
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Wake every publisher waiting for buffer space.
    pub fn notify_drained(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Receiver that observes future drains.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl Default for DrainSignal {
    fn default() -> Self {
        Self::new()
    }
}
