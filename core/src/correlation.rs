//! Correlation identifiers for cross-service tracing.
//!
//! A [`CorrelationId`] is created at the first entry point of a causally
//! related chain of calls and events, then forwarded unchanged on every hop.
//! A hop only mints a fresh one when none was supplied.
//!
//! # Example
//!
//! ```
//! use concord_core::correlation::CorrelationId;
//!
//! // Inbound request carried an id: forward it, whatever its shape
//! let forwarded = CorrelationId::from_header(Some("req-7f3a-upstream"));
//! assert_eq!(forwarded.to_string(), "req-7f3a-upstream");
//!
//! // No id on the inbound side: start a new chain
//! let fresh = CorrelationId::from_header(None);
//! assert_ne!(fresh, forwarded);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Header carrying the correlation identifier on every outbound call.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";

/// Inbound value that cannot be forwarded as a correlation identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Correlation id must be non-empty printable ASCII: {0:?}")]
pub struct InvalidCorrelationId(String);

/// Opaque identifier propagated across a causally related chain.
///
/// Identifiers minted here are UUIDs, but any printable ASCII token received
/// from upstream is forwarded as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Start a new chain.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an identifier received from a peer.
    ///
    /// Returns `None` when the value is blank or holds characters that cannot
    /// travel in an HTTP header or record header.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let forwardable =
            !value.is_empty() && value.chars().all(|c| c.is_ascii_graphic() || c == ' ');
        forwardable.then(|| Self(value.to_string()))
    }

    /// Forward the inbound header value if present, else start a new chain.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_default()
    }

    /// Forward `existing` if the caller had one, else start a new chain.
    #[must_use]
    pub fn or_new(existing: Option<Self>) -> Self {
        existing.unwrap_or_default()
    }

    /// The identifier as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl FromStr for CorrelationId {
    type Err = InvalidCorrelationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InvalidCorrelationId(s.to_string()))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
