//! Topic-routed event publishing.
//!
//! [`EventPublisher`] writes every event to one configured topic exchange.
//! It never names a queue: the exchange decides which bound queues receive
//! each message by matching the routing key against their binding patterns, so
//! publish-side behavior is identical whether zero or many consumers exist.
//!
//! # Delivery
//!
//! Every event is JSON, marked durable, and handed off once. `publish` returns
//! when the broker has accepted the message for routing. There is no internal
//! retry: delivery is at-most-once and best-effort. A call site that cannot
//! tolerate losing an event when the broker is down needs its own outbox.
//!
//! # Backpressure
//!
//! When the channel buffer is full, `publish` waits on the channel's drain
//! signal and tries again. Callers cannot tell a buffered wait from an
//! immediate send; both succeed.
//!
//! # Correlation
//!
//! [`EventPublisher::publish_with`] tags the event with the correlation
//! identifier of the call chain that produced it. The identifier is logged on
//! success and failure and travels to the broker with the message.

use crate::metrics::PublishMetrics;
use concord_core::correlation::CorrelationId;
use concord_core::event::EventEnvelope;
use concord_core::exchange::{ExchangeChannel, ExchangeError, TryPublishError};
use concord_core::routing::RoutingKey;
use serde::Serialize;
use std::sync::Arc;

/// Publishes events to a single topic exchange.
///
/// Cheap to clone; clones share the underlying channel.
///
/// # Example
///
/// ```rust,ignore
/// let publisher = EventPublisher::new(Arc::new(exchange), "domain-events");
///
/// publisher
///     .publish("invoice.payment.created", &InvoicePaid { invoice_id, amount })
///     .await?;
/// ```
#[derive(Clone)]
pub struct EventPublisher {
    channel: Option<Arc<dyn ExchangeChannel>>,
    exchange: String,
}

impl EventPublisher {
    /// Publish to `exchange` through `channel`.
    #[must_use]
    pub fn new(channel: Arc<dyn ExchangeChannel>, exchange: impl Into<String>) -> Self {
        Self {
            channel: Some(channel),
            exchange: exchange.into(),
        }
    }

    /// A publisher with no broker: every publish fails with
    /// [`ExchangeError::ChannelUnavailable`].
    #[must_use]
    pub fn without_channel(exchange: impl Into<String>) -> Self {
        Self {
            channel: None,
            exchange: exchange.into(),
        }
    }

    /// Exchange every event goes to.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Serialize `payload` as JSON and publish it under `routing_key`.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::InvalidRoutingKey`] for a malformed key
    /// - [`ExchangeError::Serialization`] if `payload` cannot be serialized
    /// - [`ExchangeError::ChannelUnavailable`] when no channel is available
    /// - [`ExchangeError::Rejected`] if the broker refuses the message
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), ExchangeError> {
        self.publish_with(routing_key, payload, None).await
    }

    /// [`Self::publish`], tagging the event with `correlation_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::publish`].
    pub async fn publish_with<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), ExchangeError> {
        let key = RoutingKey::new(routing_key).map_err(|e| {
            tracing::error!(
                exchange = %self.exchange,
                routing_key,
                correlation_id = correlation_id.as_ref().map(CorrelationId::as_str),
                error = %e,
                "Rejected event with malformed routing key"
            );
            ExchangeError::InvalidRoutingKey(e.to_string())
        })?;
        let mut envelope = EventEnvelope::json(key, payload).map_err(|e| {
            tracing::error!(
                exchange = %self.exchange,
                routing_key,
                correlation_id = correlation_id.as_ref().map(CorrelationId::as_str),
                error = %e,
                "Failed to serialize event"
            );
            ExchangeError::Serialization(e.to_string())
        })?;
        if let Some(id) = correlation_id {
            envelope = envelope.with_correlation_id(id);
        }
        self.publish_envelope(&envelope).await
    }

    /// Publish an envelope that is already serialized.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::ChannelUnavailable`] when no channel is available
    /// - [`ExchangeError::Rejected`] if the broker refuses the message
    pub async fn publish_envelope(&self, envelope: &EventEnvelope) -> Result<(), ExchangeError> {
        let result = self.dispatch(envelope).await;
        let correlation_id = envelope.correlation_id().map(CorrelationId::as_str);
        match &result {
            Ok(()) => {
                PublishMetrics::record_published();
                tracing::debug!(
                    exchange = %self.exchange,
                    routing_key = %envelope.routing_key(),
                    correlation_id,
                    bytes = envelope.body().len(),
                    "Event published"
                );
            },
            Err(e) => {
                PublishMetrics::record_error();
                tracing::error!(
                    exchange = %self.exchange,
                    routing_key = %envelope.routing_key(),
                    correlation_id,
                    error = %e,
                    "Failed to publish event"
                );
            },
        }
        result
    }

    async fn dispatch(&self, envelope: &EventEnvelope) -> Result<(), ExchangeError> {
        let channel = self.channel.as_ref().ok_or_else(|| self.unavailable())?;

        // Subscribe before the first attempt so a drain between a full
        // buffer and the wait below is never missed
        let mut drained = channel.drain_signal();

        loop {
            match channel.try_publish(&self.exchange, envelope) {
                Ok(ack) => return ack.await,
                Err(TryPublishError::BufferFull) => {
                    PublishMetrics::record_backpressure_wait();
                    tracing::warn!(
                        exchange = %self.exchange,
                        routing_key = %envelope.routing_key(),
                        correlation_id = envelope.correlation_id().map(CorrelationId::as_str),
                        "Channel buffer full, waiting for drain"
                    );
                    drained.changed().await.map_err(|_| self.unavailable())?;
                },
                Err(TryPublishError::Failed(e)) => return Err(e),
            }
        }
    }

    fn unavailable(&self) -> ExchangeError {
        ExchangeError::ChannelUnavailable {
            exchange: self.exchange.clone(),
        }
    }
}
