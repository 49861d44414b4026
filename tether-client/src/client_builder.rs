//! Fluent construction of a [`Connection`]
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ConnectConfig, HeartbeatConfig, LifecycleEvent};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), tether_core::ConnectError> {
//! let conn = ClientBuilder::new("wss://test.deribit.com/ws/api/v2")
//!     .with_config(
//!         ConnectConfig::default()
//!             .with_retry_count(5)
//!             .with_heartbeat(HeartbeatConfig::request("public/test", Duration::from_secs(10))),
//!     )
//!     .on_event(|event| async move {
//!         if let LifecycleEvent::Connected { reconnected: true } = event {
//!             // re-subscribe here
//!         }
//!     })
//!     .with_metrics("deribit-feed")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::Connection;
use crate::config::ConnectConfig;
use crate::connection_state::LifecycleEvent;
use crate::metrics::ClientMetrics;
use crate::observer::Observer;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tether_core::{ConnectError, ObservabilityConfig};

/// Builder for a [`Connection`]
pub struct ClientBuilder {
    url: String,
    config: ConnectConfig,
    observer: Observer,
    metrics_service: Option<String>,
    observability_config: Option<ObservabilityConfig>,
}

impl ClientBuilder {
    /// Start building a connection to `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: ConnectConfig::default(),
            observer: Observer::new(),
            metrics_service: None,
            observability_config: None,
        }
    }

    /// Replace the connection configuration
    pub fn with_config(mut self, config: ConnectConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle unsolicited messages with the given `method`
    pub fn on_notification<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.observer.on_notification(method, handler);
        self
    }

    /// Handle unsolicited messages no method handler claims
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.observer.on_message(handler);
        self
    }

    /// Handle lifecycle events
    pub fn on_event<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.observer.on_event(handler);
        self
    }

    /// Record metrics on the global meter provider under `service_name`
    pub fn with_metrics(mut self, service_name: impl Into<String>) -> Self {
        self.metrics_service = Some(service_name.into());
        self
    }

    /// Install the observability pipeline on connect and record metrics
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.metrics_service = Some(config.service_name.clone());
        self.observability_config = Some(config);
        self
    }

    /// Validate, dial and wait for the first connection
    pub async fn connect(self) -> Result<Connection, ConnectError> {
        if let Some(config) = self.observability_config {
            tether_core::init_observability(config)
                .map_err(|e| ConnectError::InvalidConfig(format!("observability: {}", e)))?;
        }

        let metrics = self
            .metrics_service
            .map(|name| Arc::new(ClientMetrics::new(name)));

        tracing::info!(url = %self.url, "connecting");
        Connection::start(&self.url, self.config, self.observer, metrics).await
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("url", &self.url)
            .field("config", &self.config)
            .field("observer", &self.observer)
            .field("metrics_service", &self.metrics_service)
            .finish()
    }
}
