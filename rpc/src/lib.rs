//! # Concord RPC
//!
//! Service-to-service HTTP client with:
//!
//! - **Per-attempt credentials**: a freshly signed 30-second service token on
//!   every request ([`ServiceTokenIssuer`])
//! - **Correlation propagation**: `X-Correlation-Id` forwarded or generated,
//!   never dropped
//! - **Bounded retries**: 5xx and network failures retry with backoff, 4xx
//!   never does
//! - **Whole-call deadline**: one timeout covers every attempt and backoff
//! - **Envelope unwrapping and schema checks**: `{ ok, data, timestamp }`
//!   peeled off, then validated strictly or leniently
//!
//! ## Example
//!
//! ```no_run
//! use concord_rpc::{CallOptions, RpcClient, RpcClientConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), concord_rpc::RpcError> {
//! let billing = RpcClient::new(
//!     RpcClientConfig::default()
//!         .with_base_url("http://billing:3000")
//!         .with_signing_secret("from-env"),
//! )?;
//!
//! let invoice = billing
//!     .post("/invoices", &json!({"customer_id": 7}), CallOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// HTTP client and per-call options
pub mod client;

/// RPC error types
pub mod error;

/// Response validators
pub mod schema;

/// Service token minting
pub mod token;

pub use client::{CallOptions, RpcClient, RpcClientConfig};
pub use error::RpcError;
pub use schema::{ResponseValidator, TypedSchema, validator_fn};
pub use token::{ServiceClaims, ServiceTokenConfig, ServiceTokenIssuer};
