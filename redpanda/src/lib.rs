//! Redpanda exchange channel for the Concord event publisher.
//!
//! [`RedpandaExchange`] implements [`ExchangeChannel`] on top of rdkafka's
//! [`ThreadedProducer`]. It works against Redpanda or any other broker that
//! speaks the Kafka protocol.
//!
//! # Mapping
//!
//! ```text
//! topic exchange  ──►  Kafka topic (the exchange name)
//! routing key     ──►  message key + `routing-key` header
//! content type    ──►  `content-type` header
//! correlation id  ──►  `x-correlation-id` header (tagged events only)
//! durable         ──►  acks=all
//! channel buffer  ──►  librdkafka producer queue (queue.buffering.max.messages)
//! ```
//!
//! Binding-pattern fan-out happens on the consumer side: each consuming
//! service reads the topic with its own consumer group and keeps the messages
//! whose routing key matches its patterns (see `RoutingKey::matches_pattern`).
//!
//! # Backpressure
//!
//! A full producer queue makes `send` fail with `QueueFull`, which surfaces as
//! [`TryPublishError::BufferFull`]. Every delivery report frees a queue slot,
//! so the producer context advances the [`DrainSignal`] from the delivery
//! callback and waiting publishers try again.
//!
//! # Example
//!
//! ```no_run
//! use concord_redpanda::RedpandaExchange;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exchange = RedpandaExchange::builder()
//!     .brokers("localhost:9092")
//!     .buffer_messages(50_000)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use concord_core::event::EventEnvelope;
use concord_core::exchange::{
    AckFuture, DrainSignal, ExchangeChannel, ExchangeError, TryPublishError,
};
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Header carrying the event's routing key.
pub const ROUTING_KEY_HEADER: &str = "routing-key";

/// Header carrying the event's content type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Header carrying the correlation identifier of a tagged event.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const DEFAULT_BUFFER_MESSAGES: usize = 100_000;
const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

type DeliveryAck = oneshot::Sender<Result<(), String>>;

/// Producer context that completes acks and signals drains.
pub struct DrainSignalContext {
    drained: DrainSignal,
}

impl ClientContext for DrainSignalContext {}

impl ProducerContext for DrainSignalContext {
    type DeliveryOpaque = Box<DeliveryAck>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, ack: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(_) => Ok(()),
            Err((e, _)) => Err(e.to_string()),
        };
        // Publisher may have stopped waiting; nothing to report to
        let _ = ack.send(outcome);
        self.drained.notify_drained();
    }
}

/// Exchange channel backed by a Redpanda producer.
///
/// One instance per process; share it behind an `Arc`.
pub struct RedpandaExchange {
    producer: ThreadedProducer<DrainSignalContext>,
    brokers: String,
    closed: AtomicBool,
}

impl RedpandaExchange {
    /// Connect to `brokers` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, ExchangeError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring an exchange.
    #[must_use]
    pub fn builder() -> RedpandaExchangeBuilder {
        RedpandaExchangeBuilder::default()
    }

    /// Bootstrap servers this exchange was built with.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Flush buffered messages and refuse further publishes.
    ///
    /// Waits at most `timeout` for outstanding deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::ConnectionFailed`] if messages were still
    /// queued when the timeout expired.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ExchangeError> {
        self.closed.store(true, Ordering::SeqCst);
        // Wake publishers parked on a full buffer so they observe the close
        self.producer.context().drained.notify_drained();

        let in_flight = self.producer.in_flight_count();
        tracing::info!(brokers = %self.brokers, in_flight, "Flushing event producer");

        self.producer.flush(timeout).map_err(|e| {
            tracing::warn!(error = %e, "Event producer flush incomplete");
            ExchangeError::ConnectionFailed(format!("Flush failed: {e}"))
        })
    }
}

impl ExchangeChannel for RedpandaExchange {
    fn try_publish(
        &self,
        exchange: &str,
        envelope: &EventEnvelope,
    ) -> Result<AckFuture, TryPublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TryPublishError::Failed(ExchangeError::ChannelUnavailable {
                exchange: exchange.to_string(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        let routing_key = envelope.routing_key().as_str();
        let record = BaseRecord::with_opaque_to(exchange, Box::new(tx))
            .payload(envelope.body())
            .key(routing_key)
            .headers(record_headers(envelope));

        if let Err((e, _record)) = self.producer.send(record) {
            return Err(classify_send_error(&e, routing_key));
        }

        let routing_key = routing_key.to_string();
        let exchange = exchange.to_string();
        Ok(Box::pin(async move {
            match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(ExchangeError::Rejected {
                    routing_key,
                    reason,
                }),
                Err(_) => Err(ExchangeError::ChannelUnavailable { exchange }),
            }
        }))
    }

    fn drain_signal(&self) -> watch::Receiver<u64> {
        self.producer.context().drained.subscribe()
    }
}

/// Headers stamped on every produced message.
fn record_headers(envelope: &EventEnvelope) -> OwnedHeaders {
    let headers = OwnedHeaders::new()
        .insert(Header {
            key: CONTENT_TYPE_HEADER,
            value: Some(envelope.content_type()),
        })
        .insert(Header {
            key: ROUTING_KEY_HEADER,
            value: Some(envelope.routing_key().as_str()),
        });
    match envelope.correlation_id() {
        Some(id) => headers.insert(Header {
            key: CORRELATION_ID_HEADER,
            value: Some(id.as_str()),
        }),
        None => headers,
    }
}

fn classify_send_error(error: &KafkaError, routing_key: &str) -> TryPublishError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => TryPublishError::BufferFull,
        other => TryPublishError::Failed(ExchangeError::Rejected {
            routing_key: routing_key.to_string(),
            reason: other.to_string(),
        }),
    }
}

/// Builder for a [`RedpandaExchange`].
///
/// # Example
///
/// ```no_run
/// use concord_redpanda::RedpandaExchange;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let exchange = RedpandaExchange::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .compression("lz4")
///     .delivery_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaExchangeBuilder {
    brokers: Option<String>,
    compression: Option<String>,
    buffer_messages: Option<usize>,
    delivery_timeout: Option<Duration>,
}

impl RedpandaExchangeBuilder {
    /// Comma-separated bootstrap servers (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer queue capacity in messages. A full queue is backpressure.
    ///
    /// Default: 100 000
    #[must_use]
    pub const fn buffer_messages(mut self, messages: usize) -> Self {
        self.buffer_messages = Some(messages);
        self
    }

    /// How long the broker has to acknowledge a message before it is reported failed.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaExchange`].
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Invalid configuration
    /// - Cannot create producer
    pub fn build(self) -> Result<RedpandaExchange, ExchangeError> {
        let brokers = self
            .brokers
            .ok_or_else(|| ExchangeError::ConnectionFailed("Brokers not configured".to_string()))?;
        let buffer_messages = self.buffer_messages.unwrap_or(DEFAULT_BUFFER_MESSAGES);
        let delivery_timeout = self.delivery_timeout.unwrap_or(DEFAULT_DELIVERY_TIMEOUT);
        let compression = self.compression.as_deref().unwrap_or("none");

        let mut producer_config = ClientConfig::new();
        producer_config
            .set("bootstrap.servers", &brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", compression)
            .set("queue.buffering.max.messages", buffer_messages.to_string())
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string());

        let context = DrainSignalContext {
            drained: DrainSignal::new(),
        };
        let producer: ThreadedProducer<DrainSignalContext> =
            producer_config.create_with_context(context).map_err(|e| {
                ExchangeError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            compression,
            buffer_messages,
            delivery_timeout_ms = delivery_timeout.as_millis(),
            "RedpandaExchange created successfully"
        );

        Ok(RedpandaExchange {
            producer,
            brokers,
            closed: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use concord_core::correlation::CorrelationId;
    use concord_core::routing::RoutingKey;
    use rdkafka::message::Headers;

    #[test]
    fn redpanda_exchange_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaExchange>();
        assert_sync::<RedpandaExchange>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaExchange::builder().build();
        assert!(matches!(result, Err(ExchangeError::ConnectionFailed(_))));
    }

    #[test]
    fn queue_full_is_backpressure() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        assert!(matches!(
            classify_send_error(&err, "x.y.created"),
            TryPublishError::BufferFull
        ));
    }

    #[test]
    fn other_send_errors_are_rejections() {
        let err = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        match classify_send_error(&err, "x.y.created") {
            TryPublishError::Failed(ExchangeError::Rejected { routing_key, .. }) => {
                assert_eq!(routing_key, "x.y.created");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn headers_carry_content_type_and_routing_key() {
        let envelope = EventEnvelope::from_json_bytes(
            RoutingKey::new("invoice.payment.created").unwrap(),
            b"{}".to_vec(),
        );
        let headers = record_headers(&envelope);

        assert_eq!(headers.count(), 2);
        let content_type = headers.get(0);
        assert_eq!(content_type.key, CONTENT_TYPE_HEADER);
        assert_eq!(content_type.value, Some(b"application/json".as_slice()));
        let routing_key = headers.get(1);
        assert_eq!(routing_key.key, ROUTING_KEY_HEADER);
        assert_eq!(routing_key.value, Some(b"invoice.payment.created".as_slice()));
    }

    #[test]
    fn headers_carry_correlation_id_when_tagged() {
        let envelope = EventEnvelope::from_json_bytes(
            RoutingKey::new("invoice.payment.created").unwrap(),
            b"{}".to_vec(),
        )
        .with_correlation_id(CorrelationId::from_header(Some("req-7f3a-upstream")));
        let headers = record_headers(&envelope);

        assert_eq!(headers.count(), 3);
        let correlation = headers.get(2);
        assert_eq!(correlation.key, CORRELATION_ID_HEADER);
        assert_eq!(correlation.value, Some(b"req-7f3a-upstream".as_slice()));
    }
}
