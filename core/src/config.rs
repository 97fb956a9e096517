//! Configuration for the coordination layer.
//!
//! Every recognized option is an explicit field with a default. Values are read
//! from environment-style variables:
//!
//! | Variable | Effect | Default |
//! |---|---|---|
//! | `CONFIG_ENV` | deployment environment, selects the default validation mode | `development` |
//! | `REDIS_URL` | enables distributed locking | unset (degraded single-instance mode) |
//! | `LOCK_KEY_PREFIX` | namespace for lock keys | `lock:` |
//! | `KAFKA_BROKERS` | enables event publishing | unset (publish fails with channel unavailable) |
//! | `EVENT_EXCHANGE` | topic exchange events are written to | `domain-events` |
//! | `EVENT_BUFFER_MESSAGES` | producer buffer capacity | `100000` |
//! | `SERVICE_SIGNING_SECRET` | secret for minting RPC credentials | unset (calls fail) |
//! | `PEER_<NAME>_URL` | base URL of the peer `<name>` | `http://localhost:3000` |
//! | `RPC_TIMEOUT_MS` | default whole-call deadline | `10000` |
//! | `METRICS_ADDR` | Prometheus exporter bind address | unset (no exporter) |
//!
//! # Example
//!
//! ```no_run
//! use concord_core::config::CoordinationConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoordinationConfig::from_env()?;
//! let billing = config.rpc.peer_url("billing");
//! println!("billing peer at {billing}");
//! # Ok(())
//! # }
//! ```

use crate::response::ValidationMode;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Base URL used for any peer without an explicit `PEER_<NAME>_URL`.
pub const DEFAULT_PEER_URL: &str = "http://localhost:3000";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {var}: {value}")]
    InvalidValue {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// The assembled configuration is inconsistent.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Pre-production
    Staging,
    /// Production
    Production,
}

impl Environment {
    /// Parse an environment name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown names.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue {
                var: "CONFIG_ENV".to_string(),
                value: s.to_string(),
            }),
        }
    }

    /// Strict schema checks in development, lenient once deployed.
    #[must_use]
    pub const fn default_validation_mode(self) -> ValidationMode {
        match self {
            Self::Development => ValidationMode::Strict,
            Self::Staging | Self::Production => ValidationMode::Lenient,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Lock coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Coordination store URL. `None` runs in degraded single-instance mode.
    pub store_url: Option<String>,
    /// Literal prefix for every lock key.
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            key_prefix: "lock:".to_string(),
        }
    }
}

/// Event publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsConfig {
    /// Comma-separated broker addresses. `None` leaves the publisher without a channel.
    pub brokers: Option<String>,
    /// Topic exchange every event is published to.
    pub exchange: String,
    /// Maximum messages buffered in the producer before sends report buffer full.
    pub buffer_messages: usize,
    /// How long the broker has to acknowledge a buffered message.
    pub delivery_timeout: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            exchange: "domain-events".to_string(),
            buffer_messages: 100_000,
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

/// RPC client configuration shared by every peer.
#[derive(Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Secret for signing per-call service tokens.
    pub signing_secret: Option<String>,
    /// Base URL per downstream peer, keyed by lowercase peer name.
    pub peers: HashMap<String, String>,
    /// Whole-call deadline including retries.
    pub default_timeout: Duration,
    /// Response schema mismatch policy.
    pub validation_mode: ValidationMode,
}

impl RpcConfig {
    /// Base URL for `peer`, falling back to [`DEFAULT_PEER_URL`].
    #[must_use]
    pub fn peer_url(&self, peer: &str) -> String {
        self.peers
            .get(&peer.to_lowercase())
            .cloned()
            .unwrap_or_else(|| DEFAULT_PEER_URL.to_string())
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            peers: HashMap::new(),
            default_timeout: Duration::from_secs(10),
            validation_mode: ValidationMode::Strict,
        }
    }
}

impl fmt::Debug for RpcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConfig")
            .field("signing_secret", &self.signing_secret.as_ref().map(|_| "<redacted>"))
            .field("peers", &self.peers)
            .field("default_timeout", &self.default_timeout)
            .field("validation_mode", &self.validation_mode)
            .finish()
    }
}

/// Top-level coordination configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinationConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Lock coordinator settings
    pub lock: LockConfig,
    /// Event publisher settings
    pub events: EventsConfig,
    /// RPC client settings
    pub rpc: RpcConfig,
    /// Prometheus exporter address
    pub metrics_addr: Option<SocketAddr>,
}

impl CoordinationConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Load configuration from raw OS variables.
    ///
    /// Pairs whose name or value is not valid UTF-8 are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_os_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_vars(vars.into_iter().filter_map(|(name, value)| {
            match (name.into_string(), value.into_string()) {
                (Ok(name), Ok(value)) => Some((name, value)),
                (name, _) => {
                    tracing::debug!(var = ?name, "Skipping environment variable that is not UTF-8");
                    None
                },
            }
        }))
    }

    /// Load configuration from an explicit set of variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable cannot be parsed or the result is invalid.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |name: &str| vars.get(name).cloned();

        let environment = get("CONFIG_ENV")
            .map(|s| Environment::parse(&s))
            .transpose()?
            .unwrap_or_default();

        let mut config = Self {
            environment,
            ..Self::default()
        };
        config.rpc.validation_mode = environment.default_validation_mode();

        config.lock.store_url = get("REDIS_URL");
        if let Some(prefix) = get("LOCK_KEY_PREFIX") {
            config.lock.key_prefix = prefix;
        }

        config.events.brokers = get("KAFKA_BROKERS");
        if let Some(exchange) = get("EVENT_EXCHANGE") {
            config.events.exchange = exchange;
        }
        if let Some(raw) = get("EVENT_BUFFER_MESSAGES") {
            config.events.buffer_messages = parse_var("EVENT_BUFFER_MESSAGES", &raw)?;
        }

        config.rpc.signing_secret = get("SERVICE_SIGNING_SECRET");
        if let Some(raw) = get("RPC_TIMEOUT_MS") {
            config.rpc.default_timeout =
                Duration::from_millis(parse_var("RPC_TIMEOUT_MS", &raw)?);
        }
        config.rpc.peers = vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("PEER_")
                    .and_then(|rest| rest.strip_suffix("_URL"))
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_lowercase(), v.clone()))
            })
            .collect();

        if let Some(raw) = get("METRICS_ADDR") {
            config.metrics_addr = Some(parse_var("METRICS_ADDR", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock.key_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "lock key prefix must not be empty".to_string(),
            ));
        }
        if self.events.exchange.is_empty() {
            return Err(ConfigError::ValidationError(
                "event exchange must not be empty".to_string(),
            ));
        }
        if self.events.buffer_messages == 0 {
            return Err(ConfigError::ValidationError(
                "event buffer must hold at least one message".to_string(),
            ));
        }
        if self.rpc.default_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "rpc timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var: var.to_string(),
        value: raw.to_string(),
    })
}
