//! Error types for service-to-service calls

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when calling a peer service
#[derive(Debug, Error, Clone)]
pub enum RpcError {
    /// Peer answered 4xx. Never retried.
    #[error("Peer rejected request (status {status}): {body}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body as sent by the peer
        body: String,
    },

    /// Peer answered 5xx. Retried up to the policy's limit.
    #[error("Peer failed (status {status}): {body}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body as sent by the peer
        body: String,
    },

    /// Connection refused, reset, or broken mid-response. Retried.
    #[error("Network error: {0}")]
    Network(String),

    /// The whole-call deadline fired, retries included.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// No signing secret configured, so no credential can be minted.
    #[error("Missing SERVICE_SIGNING_SECRET, cannot mint service token")]
    MissingSigningSecret,

    /// Signing the service token failed.
    #[error("Failed to sign service token: {0}")]
    TokenSigning(String),

    /// Base URL and path do not form a valid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The request body could not be serialized.
    #[error("Failed to encode request body: {0}")]
    Encode(String),

    /// The response body was not the JSON the caller expected.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The response failed schema validation in strict mode.
    #[error("Response failed schema validation: {0}")]
    SchemaMismatch(String),
}

impl RpcError {
    /// Whether another attempt could succeed.
    ///
    /// Only 5xx responses and network failures qualify.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. } | Self::Network(_))
    }

    /// HTTP status, when the peer answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Generic classification safe to return to this service's own callers.
    ///
    /// Carries no peer body, secret, or internal detail.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::Client { .. } => "upstream request rejected",
            Self::Server { .. } | Self::Network(_) => "upstream service unavailable",
            Self::Timeout(_) => "upstream service timed out",
            Self::SchemaMismatch(_) | Self::Decode(_) => "upstream returned an unexpected response",
            Self::MissingSigningSecret
            | Self::TokenSigning(_)
            | Self::InvalidUrl(_)
            | Self::Encode(_) => "internal error",
        }
    }
}
