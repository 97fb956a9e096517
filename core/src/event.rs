//! Event envelopes handed to the broker.
//!
//! An [`EventEnvelope`] is built once per publish call. The body is already
//! serialized when the publisher sees it, and the routing key cannot change
//! after construction. The correlation identifier of the chain that produced
//! the event rides along so consumers can continue it.

use crate::correlation::CorrelationId;
use crate::routing::RoutingKey;
use serde::Serialize;

/// Content type stamped on every published event.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A serialized event addressed by routing key.
///
/// Envelopes have no persisted identity in this layer; they live only for the
/// duration of a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    routing_key: RoutingKey,
    body: Vec<u8>,
    content_type: &'static str,
    durable: bool,
    correlation_id: Option<CorrelationId>,
}

impl EventEnvelope {
    /// Serialize `payload` as JSON into a durable envelope.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if `payload` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(
        routing_key: RoutingKey,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        Ok(Self::from_json_bytes(routing_key, body))
    }

    /// Wrap a body that is already JSON-encoded.
    #[must_use]
    pub const fn from_json_bytes(routing_key: RoutingKey, body: Vec<u8>) -> Self {
        Self {
            routing_key,
            body,
            content_type: JSON_CONTENT_TYPE,
            durable: true,
            correlation_id: None,
        }
    }

    /// Tag the event with the chain it belongs to.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Routing key the exchange matches bindings against.
    #[must_use]
    pub const fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// Serialized payload.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Always `application/json`.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Persistent delivery flag. Always `true`.
    #[must_use]
    pub const fn durable(&self) -> bool {
        self.durable
    }

    /// Correlation identifier of the originating chain, if any.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_envelope_is_durable_and_typed() {
        let key = RoutingKey::new("invoice.payment.created").unwrap();
        let envelope = EventEnvelope::json(key.clone(), &json!({"invoice_id": 42})).unwrap();

        assert_eq!(envelope.routing_key(), &key);
        assert_eq!(envelope.content_type(), "application/json");
        assert!(envelope.durable());
        assert_eq!(envelope.body(), br#"{"invoice_id":42}"#);
        assert!(envelope.correlation_id().is_none());
    }

    #[test]
    fn correlation_id_travels_with_envelope() {
        let key = RoutingKey::new("invoice.payment.created").unwrap();
        let id = CorrelationId::from_header(Some("req-7f3a-upstream"));
        let envelope = EventEnvelope::json(key, &json!({}))
            .unwrap()
            .with_correlation_id(id.clone());

        assert_eq!(envelope.correlation_id(), Some(&id));
    }
}
