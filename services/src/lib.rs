//! # Concord Services
//!
//! One-call bootstrap for a service process: reads [`CoordinationConfig`],
//! connects the infrastructure that is configured, and degrades gracefully
//! for what is not.
//!
//! | Missing or unreachable | Result |
//! |---|---|
//! | `REDIS_URL` | locks run unprotected (single-instance mode) |
//! | `KAFKA_BROKERS` | every publish fails with `ChannelUnavailable` |
//! | `SERVICE_SIGNING_SECRET` | every RPC call fails with `MissingSigningSecret` |
//! | `METRICS_ADDR` | no Prometheus exporter |
//!
//! Nothing here fails startup except an unparseable configuration or a
//! metrics listener that cannot be installed.
//!
//! ## Example
//!
//! ```no_run
//! use concord_services::{CoordinationServices, init_tracing};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_tracing();
//! let services = CoordinationServices::from_env().await?;
//!
//! services
//!     .lock()
//!     .with_lock("nightly-invoices", Duration::from_secs(300), || async {
//!         let billing = services.rpc("billing")?;
//!         let run = billing.post("/runs", &serde_json::json!({}), Default::default()).await?;
//!         services.publisher().publish("billing.run.completed", &run).await?;
//!         Ok::<_, Box<dyn std::error::Error>>(())
//!     })
//!     .await?;
//!
//! services.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use concord_core::config::{ConfigError, CoordinationConfig, RpcConfig};
use concord_core::exchange::ExchangeError;
use concord_core::lock_store::CoordinationStore;
use concord_redis::RedisCoordinationStore;
use concord_redpanda::RedpandaExchange;
use concord_rpc::{RpcClient, RpcClientConfig, RpcError};
use concord_runtime::metrics::{MetricsError, MetricsServer};
use concord_runtime::{EventPublisher, LockCoordinator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors that stop the process from starting or shutting down cleanly.
#[derive(Error, Debug)]
pub enum ServicesError {
    /// Configuration could not be loaded or is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The metrics exporter could not be installed.
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// Buffered events could not be flushed on shutdown.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Install a `tracing` subscriber honoring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .try_init();
}

/// Lock coordinator, event publisher and RPC clients for one process.
pub struct CoordinationServices {
    locks: LockCoordinator,
    publisher: EventPublisher,
    exchange: Option<Arc<RedpandaExchange>>,
    rpc_config: RpcConfig,
    rpc_clients: Mutex<HashMap<String, RpcClient>>,
    metrics: Option<MetricsServer>,
}

impl CoordinationServices {
    /// Load configuration from the environment and connect.
    ///
    /// # Errors
    ///
    /// See [`Self::connect`], plus configuration errors.
    pub async fn from_env() -> Result<Self, ServicesError> {
        let config = CoordinationConfig::from_env()?;
        Self::connect(&config).await
    }

    /// Connect everything `config` enables.
    ///
    /// Store and broker failures degrade with a warning instead of failing.
    ///
    /// # Errors
    ///
    /// - [`ServicesError::Config`] if `config` fails validation
    /// - [`ServicesError::Metrics`] if the exporter cannot be installed
    pub async fn connect(config: &CoordinationConfig) -> Result<Self, ServicesError> {
        config.validate()?;

        let metrics = match config.metrics_addr {
            Some(addr) => {
                let mut server = MetricsServer::new(addr);
                server.start()?;
                Some(server)
            },
            None => None,
        };

        let store = Self::connect_store(config).await;
        let locks =
            LockCoordinator::from_optional(store).with_key_prefix(config.lock.key_prefix.clone());

        let exchange = Self::connect_exchange(config);
        let publisher = match &exchange {
            Some(exchange) => EventPublisher::new(exchange.clone(), config.events.exchange.clone()),
            None => EventPublisher::without_channel(config.events.exchange.clone()),
        };

        if config.rpc.signing_secret.is_none() {
            tracing::warn!("SERVICE_SIGNING_SECRET not set, RPC calls will fail");
        }

        tracing::info!(
            environment = ?config.environment,
            distributed_locks = locks.is_distributed(),
            broker = exchange.is_some(),
            exchange = %config.events.exchange,
            peers = config.rpc.peers.len(),
            "Coordination services ready"
        );

        Ok(Self {
            locks,
            publisher,
            exchange,
            rpc_config: config.rpc.clone(),
            rpc_clients: Mutex::new(HashMap::new()),
            metrics,
        })
    }

    async fn connect_store(config: &CoordinationConfig) -> Option<Arc<dyn CoordinationStore>> {
        let url = config.lock.store_url.as_deref()?;
        match RedisCoordinationStore::new(url).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!(error = %e, "Coordination store unreachable, locks are disabled");
                None
            },
        }
    }

    fn connect_exchange(config: &CoordinationConfig) -> Option<Arc<RedpandaExchange>> {
        let brokers = config.events.brokers.as_deref()?;
        let built = RedpandaExchange::builder()
            .brokers(brokers)
            .buffer_messages(config.events.buffer_messages)
            .delivery_timeout(config.events.delivery_timeout)
            .build();
        match built {
            Ok(exchange) => Some(Arc::new(exchange)),
            Err(e) => {
                tracing::warn!(error = %e, "Event broker unavailable, publishing is disabled");
                None
            },
        }
    }

    /// Distributed lock coordinator.
    #[must_use]
    pub const fn lock(&self) -> &LockCoordinator {
        &self.locks
    }

    /// Event publisher for the configured exchange.
    #[must_use]
    pub const fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    /// RPC client for `peer`, created on first use.
    ///
    /// Unknown peers fall back to the local development URL.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidUrl`] if the peer's configured URL is malformed.
    pub fn rpc(&self, peer: &str) -> Result<RpcClient, RpcError> {
        let name = peer.to_lowercase();
        let mut clients = self
            .rpc_clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(client) = clients.get(&name) {
            return Ok(client.clone());
        }

        let client = RpcClient::new(RpcClientConfig::for_peer(&self.rpc_config, &name))?;
        tracing::debug!(peer = %name, base_url = %client.base_url(), "RPC client created");
        clients.insert(name, client.clone());
        Ok(client)
    }

    /// Metrics in Prometheus text format, if the exporter is running.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().and_then(MetricsServer::render)
    }

    /// Flush buffered events, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ServicesError::Exchange`] if events were still buffered at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ServicesError> {
        let Some(exchange) = self.exchange.clone() else {
            tracing::info!("Coordination services stopped");
            return Ok(());
        };

        // Flush blocks on librdkafka; keep it off the async workers
        tokio::task::spawn_blocking(move || exchange.shutdown(timeout))
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(format!("Flush task failed: {e}")))??;

        tracing::info!("Coordination services stopped");
        Ok(())
    }
}
