//! Connection configuration
//!
//! ```rust
//! use tether_client::{ConnectConfig, HeartbeatConfig};
//! use std::time::Duration;
//!
//! let config = ConnectConfig::default()
//!     .with_retry_count(5)
//!     .with_retry_delay(Duration::from_millis(250))
//!     .with_heartbeat(HeartbeatConfig::request("public/test", Duration::from_secs(10)))
//!     .with_header("User-Agent", "tether/0.1");
//!
//! assert_eq!(config.retry_count, 5);
//! ```

use serde_json::Value;
use std::time::Duration;
use tether_core::ConnectError;

/// Default subscribe method (Deribit-style channel subscriptions)
pub const DEFAULT_SUBSCRIBE_METHOD: &str = "public/subscribe";
/// Default unsubscribe method
pub const DEFAULT_UNSUBSCRIBE_METHOD: &str = "public/unsubscribe";

/// Options for one logical connection
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Upper bound on a single dial, TCP + TLS + handshake
    pub connect_timeout: Duration,
    /// Retries allowed after a failure; 0 disables reconnection
    pub retry_count: u32,
    /// Base backoff delay
    pub retry_delay: Duration,
    /// Backoff cap
    pub max_retry_delay: Duration,
    /// Add up to 25% random delay on top of each backoff step
    pub jitter: bool,
    /// Keepalive; `None` relies on the peer and the OS
    pub heartbeat: Option<HeartbeatConfig>,
    /// Extra HTTP headers sent with the upgrade request
    pub headers: Vec<(String, String)>,
    /// Default deadline for correlated requests
    pub request_timeout: Duration,
    /// How long `close` waits for the peer's close frame
    pub close_grace: Duration,
    /// Method used by `subscribe`
    pub subscribe_method: String,
    /// Method used by `unsubscribe`
    pub unsubscribe_method: String,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry_count: 3,
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(30),
            jitter: false,
            heartbeat: None,
            headers: Vec::new(),
            request_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(1),
            subscribe_method: DEFAULT_SUBSCRIBE_METHOD.to_string(),
            unsubscribe_method: DEFAULT_UNSUBSCRIBE_METHOD.to_string(),
        }
    }
}

impl ConnectConfig {
    /// Set the dial timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the number of retries after a failure
    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    /// Set the base backoff delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the backoff cap
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Enable backoff jitter
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Enable keepalive
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Add an upgrade-request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the default request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the close handshake grace period
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Override the subscribe/unsubscribe method names
    pub fn with_subscription_methods(
        mut self,
        subscribe: impl Into<String>,
        unsubscribe: impl Into<String>,
    ) -> Self {
        self.subscribe_method = subscribe.into();
        self.unsubscribe_method = unsubscribe.into();
        self
    }

    /// Reject settings the connection task cannot run with
    pub fn validate(&self) -> Result<(), ConnectError> {
        if let Some(ref hb) = self.heartbeat {
            if hb.interval.is_zero() {
                return Err(ConnectError::InvalidConfig(
                    "heartbeat interval must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// What a keepalive looks like on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatKind {
    /// WebSocket ping frame
    Ping,
    /// JSON-RPC request whose response is consumed internally
    Request {
        /// Method name, e.g. `public/test`
        method: String,
        /// Optional params
        params: Option<Value>,
    },
}

/// Keepalive settings
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Frame sent every `interval`
    pub kind: HeartbeatKind,
    /// Time between keepalives
    pub interval: Duration,
    /// Silence tolerated after a keepalive before the link counts as dropped
    pub grace: Duration,
}

impl HeartbeatConfig {
    /// Ping-frame keepalive with grace equal to the interval
    pub fn ping(interval: Duration) -> Self {
        Self {
            kind: HeartbeatKind::Ping,
            interval,
            grace: interval,
        }
    }

    /// Application-level keepalive with grace equal to the interval
    pub fn request(method: impl Into<String>, interval: Duration) -> Self {
        Self {
            kind: HeartbeatKind::Request {
                method: method.into(),
                params: None,
            },
            interval,
            grace: interval,
        }
    }

    /// Override the grace period
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}
