//! Resilient HTTP client for calling peer services.
//!
//! Per call:
//!
//! ```text
//! INIT → SENDING → 2xx → unwrap envelope → validate → SUCCESS
//!                → 4xx → FAILED (no retry)
//!                → 5xx / network → retries left? → BACKOFF → SENDING
//!                                  → exhausted   → FAILED (last error)
//! ```
//!
//! The deadline bounds the whole call, backoff sleeps included. When it fires
//! the in-flight request is dropped and the call fails with
//! [`RpcError::Timeout`], even if retries remained.

use crate::error::RpcError;
use crate::schema::ResponseValidator;
use crate::token::{ServiceTokenConfig, ServiceTokenIssuer};
use concord_core::config::{DEFAULT_PEER_URL, RpcConfig};
use concord_core::correlation::{CORRELATION_ID_HEADER, CorrelationId};
use concord_core::response::{ValidationMode, unwrap_response};
use concord_runtime::metrics::RpcMetrics;
use concord_runtime::retry::{RetryPolicy, retry_with_predicate};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Default whole-call deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers the client owns on every attempt.
const RESERVED_HEADERS: [&str; 3] = ["authorization", "content-type", CORRELATION_ID_HEADER];

/// Settings for one peer.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Peer base URL, e.g. `http://billing:3000`
    pub base_url: String,
    /// Deadline for calls that do not override it
    pub default_timeout: Duration,
    /// Retry count and backoff schedule
    pub retry: RetryPolicy,
    /// Strict fails on schema mismatch, lenient logs and continues
    pub validation_mode: ValidationMode,
    /// Token signing
    pub token: ServiceTokenConfig,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PEER_URL.to_string(),
            default_timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            validation_mode: ValidationMode::Strict,
            token: ServiceTokenConfig::default(),
        }
    }
}

impl RpcClientConfig {
    /// Settings for `peer` taken from the process configuration.
    #[must_use]
    pub fn for_peer(rpc: &RpcConfig, peer: &str) -> Self {
        Self {
            base_url: rpc.peer_url(peer),
            default_timeout: rpc.default_timeout,
            validation_mode: rpc.validation_mode,
            token: ServiceTokenConfig {
                signing_secret: rpc.signing_secret.clone(),
                ..ServiceTokenConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the peer base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the default deadline.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the schema mismatch policy.
    #[must_use]
    pub const fn with_validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self
    }

    /// Set the token signing secret.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.token.signing_secret = Some(secret.into());
        self
    }
}

/// Per-call options.
///
/// # Example
///
/// ```rust,ignore
/// let options = CallOptions::new()
///     .correlation_id(incoming_correlation_id)
///     .timeout(Duration::from_secs(30))
///     .validator(TypedSchema::<Invoice>::new());
/// ```
#[derive(Clone, Default)]
pub struct CallOptions {
    correlation_id: Option<CorrelationId>,
    timeout: Option<Duration>,
    validator: Option<Arc<dyn ResponseValidator>>,
    headers: Vec<(String, String)>,
}

impl CallOptions {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `id` instead of generating one.
    #[must_use]
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Override the whole-call deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the unwrapped payload with `validator`.
    #[must_use]
    pub fn validator(mut self, validator: impl ResponseValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Send an extra header.
    ///
    /// `Authorization`, `Content-Type` and `X-Correlation-Id` are set by the
    /// client on every attempt; extra headers with those names are ignored.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if RESERVED_HEADERS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(&name))
        {
            tracing::warn!(header = %name, "Ignoring extra header that the client sets itself");
            return self;
        }
        self.headers.push((name, value.into()));
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("correlation_id", &self.correlation_id)
            .field("timeout", &self.timeout)
            .field("validator", &self.validator.as_ref().map(|v| v.name().to_string()))
            .field("headers", &self.headers)
            .finish()
    }
}

/// HTTP client for one peer service.
///
/// Cheap to clone; clones share the connection pool. Concurrent calls are
/// independent and run in parallel.
#[derive(Clone)]
pub struct RpcClient {
    http: Client,
    config: Arc<RpcClientConfig>,
    tokens: Arc<ServiceTokenIssuer>,
}

impl RpcClient {
    /// Create a client for `config.base_url`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidUrl`] if the base URL does not parse
    /// - [`RpcError::Network`] if the HTTP client cannot be built
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        Url::parse(&config.base_url)
            .map_err(|e| RpcError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        let http = Client::builder()
            .build()
            .map_err(|e| RpcError::Network(format!("Failed to build HTTP client: {e}")))?;

        if config.token.signing_secret.is_none() {
            tracing::warn!(
                base_url = %config.base_url,
                "No signing secret configured, calls to this peer will fail"
            );
        }

        Ok(Self {
            http,
            tokens: Arc::new(ServiceTokenIssuer::new(&config.token)),
            config: Arc::new(config),
        })
    }

    /// Peer base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Call the peer and return the unwrapped, validated JSON payload.
    ///
    /// A successful empty body yields `Value::Null`.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Client`] on 4xx, without retrying
    /// - [`RpcError::Server`] / [`RpcError::Network`] once retries are exhausted
    /// - [`RpcError::Timeout`] when the deadline fires first
    /// - [`RpcError::SchemaMismatch`] on validation failure in strict mode
    /// - [`RpcError::MissingSigningSecret`] when no credential can be minted
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        let correlation_id = CorrelationId::or_new(options.correlation_id.clone());
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let span = tracing::info_span!(
            "rpc_call",
            method = %method,
            path,
            correlation_id = %correlation_id,
        );

        async move {
            let started = Instant::now();
            let result = self
                .execute(&method, path, body, &options, &correlation_id, timeout)
                .await;
            RpcMetrics::record_call(started.elapsed(), result.is_ok());

            if let Err(e) = &result {
                tracing::error!(
                    correlation_id = %correlation_id,
                    status = e.status(),
                    error = %e,
                    "RPC call failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    /// [`Self::call`], then deserialize the payload into `T`.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus [`RpcError::Decode`] if the payload is not a `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: CallOptions,
    ) -> Result<T, RpcError> {
        let value = self.call(method, path, body, options).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn get(&self, path: &str, options: CallOptions) -> Result<Value, RpcError> {
        self.call(Method::GET, path, None, options).await
    }

    /// `DELETE path`.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn delete(&self, path: &str, options: CallOptions) -> Result<Value, RpcError> {
        self.call(Method::DELETE, path, None, options).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// [`RpcError::Encode`] if `body` cannot be serialized, otherwise see [`Self::call`].
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.call_with_body(Method::POST, path, body, options).await
    }

    /// `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// [`RpcError::Encode`] if `body` cannot be serialized, otherwise see [`Self::call`].
    pub async fn put<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.call_with_body(Method::PUT, path, body, options).await
    }

    /// `PATCH path` with a JSON body.
    ///
    /// # Errors
    ///
    /// [`RpcError::Encode`] if `body` cannot be serialized, otherwise see [`Self::call`].
    pub async fn patch<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        self.call_with_body(Method::PATCH, path, body, options).await
    }

    async fn call_with_body<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        let body = serde_json::to_value(body).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.call(method, path, Some(&body), options).await
    }

    async fn execute(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        options: &CallOptions,
        correlation_id: &CorrelationId,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let url = self.url(path)?;
        let url = &url;
        let headers = options.headers.as_slice();

        let attempts = retry_with_predicate(
            &self.config.retry,
            move |attempt| self.send_once(method, url, body, headers, correlation_id, attempt),
            RpcError::is_retryable,
        );

        let value = tokio::time::timeout(timeout, attempts)
            .await
            .map_err(|_| RpcError::Timeout(timeout))??;

        self.check_schema(unwrap_response(value), options.validator.as_deref())
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        extra_headers: &[(String, String)],
        correlation_id: &CorrelationId,
        attempt: usize,
    ) -> Result<Value, RpcError> {
        RpcMetrics::record_attempt();

        // Fresh credential per attempt, never reused
        let token = self.tokens.mint()?;

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/json")
            .header(CORRELATION_ID_HEADER, correlation_id.as_str());
        for (name, value) in extra_headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RpcError::Network(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| RpcError::Network(e.to_string()))?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!(attempt, status = status.as_u16(), "Peer returned error status");

        if status.is_server_error() {
            Err(RpcError::Server {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(RpcError::Client {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn check_schema(
        &self,
        value: Value,
        validator: Option<&dyn ResponseValidator>,
    ) -> Result<Value, RpcError> {
        let Some(validator) = validator else {
            return Ok(value);
        };

        match validator.validate(&value) {
            Ok(()) => Ok(value),
            Err(reason) if self.config.validation_mode.is_strict() => Err(
                RpcError::SchemaMismatch(format!("{}: {reason}", validator.name())),
            ),
            Err(reason) => {
                tracing::warn!(
                    schema = validator.name(),
                    reason = %reason,
                    "Response failed schema validation, returning unvalidated data"
                );
                Ok(value)
            },
        }
    }

    fn url(&self, path: &str) -> Result<Url, RpcError> {
        let joined = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| RpcError::InvalidUrl(format!("{joined}: {e}")))
    }
}

impl fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn joins_base_and_path_with_one_slash() {
        let client =
            RpcClient::new(RpcClientConfig::default().with_base_url("http://billing:3000/")).unwrap();

        assert_eq!(
            client.url("/invoices/7").unwrap().as_str(),
            "http://billing:3000/invoices/7"
        );
        assert_eq!(
            client.url("invoices").unwrap().as_str(),
            "http://billing:3000/invoices"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = RpcClient::new(RpcClientConfig::default().with_base_url("not a url"));
        assert!(matches!(result, Err(RpcError::InvalidUrl(_))));
    }

    #[test]
    fn peer_config_falls_back_to_local_default() {
        let rpc = RpcConfig {
            signing_secret: Some("s".to_string()),
            peers: HashMap::from([("billing".to_string(), "http://billing:8080".to_string())]),
            default_timeout: Duration::from_secs(3),
            validation_mode: ValidationMode::Lenient,
        };

        let billing = RpcClientConfig::for_peer(&rpc, "BILLING");
        assert_eq!(billing.base_url, "http://billing:8080");
        assert_eq!(billing.default_timeout, Duration::from_secs(3));
        assert_eq!(billing.validation_mode, ValidationMode::Lenient);
        assert!(billing.token.signing_secret.is_some());

        let unknown = RpcClientConfig::for_peer(&rpc, "inventory");
        assert_eq!(unknown.base_url, DEFAULT_PEER_URL);
    }

    #[test]
    fn extra_headers_cannot_replace_client_headers() {
        let options = CallOptions::new()
            .header("Authorization", "Bearer stolen")
            .header("x-correlation-id", "spoofed")
            .header("CONTENT-TYPE", "text/plain")
            .header("X-Tenant", "acme");

        assert_eq!(options.headers, vec![("X-Tenant".to_string(), "acme".to_string())]);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RpcClientConfig::default();
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.validation_mode, ValidationMode::Strict);
    }
}
