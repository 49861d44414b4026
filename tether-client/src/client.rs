//! Connection handle
//!
//! [`Connection`] is the application-facing surface. It is a cheap `Clone`
//! handle onto the connection's owner task: sends and status queries go
//! over a command channel, the current state is read from a `watch`
//! channel without touching the task at all.
//!
//! Dropping every handle closes the connection, the same as calling
//! [`Connection::close`]. Observer callbacks that capture a handle keep the
//! connection alive until `close` is called.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tether_client::{ConnectConfig, Connection, Reply};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::connect("wss://test.deribit.com/ws/api/v2", ConnectConfig::default()).await?;
//!
//! let reply = conn
//!     .send_message(json!({"jsonrpc": "2.0", "id": 1, "method": "public/get_time"}))
//!     .await?;
//! if let Reply::Response(response) = reply {
//!     println!("server time: {:?}", response.result);
//! }
//!
//! let instruments: serde_json::Value = conn
//!     .request("public/get_instruments", json!({"currency": "BTC"}))
//!     .await?;
//! println!("{} instruments", instruments.as_array().map_or(0, Vec::len));
//!
//! conn.close().await;
//! # Ok(())
//! # }
//! ```

use crate::client_builder::ClientBuilder;
use crate::config::ConnectConfig;
use crate::connection_state::{ConnectionState, ConnectionStatus};
use crate::controller::{Command, Controller, ControllerParts, Outbound};
use crate::metrics::ClientMetrics;
use crate::observer::{spawn_dispatcher, Observer};
use crate::transport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::codec;
use tether_core::{
    ConnectError, Error, Id, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, Result, SendError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

/// Outcome of [`Connection::send_message`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The correlated response, success or peer error
    Response(JsonRpcResponse),
    /// The message carried no id and was written to the socket
    Ack,
}

impl Reply {
    /// The response, if this was a correlated send
    pub fn into_response(self) -> Option<JsonRpcResponse> {
        match self {
            Reply::Response(response) => Some(response),
            Reply::Ack => None,
        }
    }
}

/// Handle to one reconnecting JSON-RPC WebSocket connection
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    ids: Arc<AtomicU64>,
    config: Arc<ConnectConfig>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl Connection {
    /// Connect with the given configuration
    ///
    /// Resolves once the first connection is established, or with
    /// [`ConnectError::Exhausted`] once the retry budget is spent. URL and
    /// header problems fail immediately without dialing.
    pub async fn connect(url: &str, config: ConnectConfig) -> std::result::Result<Self, ConnectError> {
        ClientBuilder::new(url).with_config(config).connect().await
    }

    /// Start a builder
    pub fn builder(url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(url)
    }

    #[tracing::instrument(skip(url, config, observer, metrics), fields(url = %url))]
    pub(crate) async fn start(
        url: &str,
        config: ConnectConfig,
        observer: Observer,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> std::result::Result<Self, ConnectError> {
        config.validate()?;
        let parsed = transport::validate_url(url)?;
        transport::build_request(&parsed, &config.headers)?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (ready_tx, ready_rx) = oneshot::channel();
        let ids = Arc::new(AtomicU64::new(1));
        let events = spawn_dispatcher(observer);

        let controller = Controller::new(ControllerParts {
            url: parsed,
            config: config.clone(),
            cmd_rx,
            state_tx,
            events,
            ids: Arc::clone(&ids),
            metrics: metrics.clone(),
            ready: ready_tx,
        });
        let span = tracing::info_span!("connection", url = %url);
        tokio::spawn(controller.run().instrument(span));

        let connection = Self {
            cmd_tx,
            state_rx,
            ids,
            config: Arc::new(config),
            metrics,
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Network(
                "connection task stopped before connecting".to_string(),
            )),
        }
    }

    /// Current state; never blocks
    pub fn get_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether sends are currently accepted
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// Receiver that observes every state change
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Allocate the next request id for this connection
    pub fn next_id(&self) -> Id {
        Id::from(self.ids.fetch_add(1, Ordering::Relaxed))
    }

    /// Send a JSON payload using the default request timeout
    ///
    /// A payload with a non-null `id` is correlated and resolves with the
    /// matching response. Anything else is written and acknowledged.
    pub async fn send_message(&self, payload: Value) -> std::result::Result<Reply, SendError> {
        self.send_message_with_timeout(payload, self.config.request_timeout)
            .await
    }

    /// Send a JSON payload with a per-call timeout for the response
    #[tracing::instrument(skip(self, payload), fields(method = payload.get("method").and_then(serde_json::Value::as_str).unwrap_or("")))]
    pub async fn send_message_with_timeout(
        &self,
        payload: Value,
        timeout: Duration,
    ) -> std::result::Result<Reply, SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }

        let id = codec::request_id(&payload)?;
        let text = codec::encode(&payload)?;

        match id {
            Some(id) => {
                let start = Instant::now();
                let method = payload
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();

                let (reply, rx) = oneshot::channel();
                self.dispatch(Command::Send {
                    text,
                    outbound: Outbound::Correlated { id, timeout, reply },
                })?;
                let outcome = rx.await.unwrap_or(Err(SendError::ConnectionClosed));

                if let Some(ref m) = self.metrics {
                    let status = match &outcome {
                        Ok(response) if response.is_success() => "success",
                        Ok(_) => "error",
                        Err(SendError::Timeout) => "timeout",
                        Err(_) => "failed",
                    };
                    m.record_request(&method, status, start.elapsed().as_secs_f64());
                }

                outcome.map(Reply::Response)
            }
            None => {
                let (ack, rx) = oneshot::channel();
                self.dispatch(Command::Send {
                    text,
                    outbound: Outbound::Fire { ack },
                })?;
                rx.await.unwrap_or(Err(SendError::NotConnected))?;
                Ok(Reply::Ack)
            }
        }
    }

    /// Call `method` and deserialize its result
    ///
    /// Peer errors surface as [`Error::JsonRpc`].
    pub async fn request<P, R>(&self, method: impl Into<String>, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let method = method.into();
        let params = serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let params = (!params.is_null()).then_some(params);
        let request = JsonRpcRequest::new(method.clone(), params, self.next_id());
        let payload = serde_json::to_value(&request).map_err(|e| Error::Serialization(e.to_string()))?;

        let response = match self.send_message(payload).await? {
            Reply::Response(response) => response,
            Reply::Ack => return Err(SendError::EncodeFailed("request was not correlated".to_string()).into()),
        };

        match response.into_outcome() {
            Ok(result) => {
                tracing::debug!(method = %method, "request completed");
                serde_json::from_value(result).map_err(|e| Error::Serialization(e.to_string()))
            }
            Err(error) => {
                tracing::debug!(method = %method, error = %error, "request returned an error");
                Err(Error::JsonRpc(error))
            }
        }
    }

    /// Send a JSON-RPC notification
    pub async fn notify<P>(&self, method: impl Into<String>, params: P) -> Result<()>
    where
        P: Serialize,
    {
        let params = serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let notification = JsonRpcNotification::new(method, (!params.is_null()).then_some(params));
        let payload =
            serde_json::to_value(&notification).map_err(|e| Error::Serialization(e.to_string()))?;

        self.send_message(payload).await?;
        Ok(())
    }

    /// Subscribe to channels with the configured subscribe method
    ///
    /// Returns the peer's result verbatim; membership is not tracked here.
    pub async fn subscribe<I, S>(&self, channels: I) -> Result<Value>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        self.request(self.config.subscribe_method.clone(), json!({ "channels": channels }))
            .await
    }

    /// Unsubscribe from channels with the configured unsubscribe method
    pub async fn unsubscribe<I, S>(&self, channels: I) -> Result<Value>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        self.request(self.config.unsubscribe_method.clone(), json!({ "channels": channels }))
            .await
    }

    /// State, retry counters and outstanding requests
    pub async fn status(&self) -> ConnectionStatus {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Status { reply }).is_ok() {
            if let Ok(status) = rx.await {
                return status;
            }
        }
        ConnectionStatus {
            state: self.get_state(),
            retry_count: 0,
            next_delay: self.config.retry_delay,
            pending: Vec::new(),
        }
    }

    /// Close the connection; always succeeds and may be called repeatedly
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close { done }).is_ok() {
            let _ = rx.await;
        }
    }

    fn dispatch(&self, cmd: Command) -> std::result::Result<(), SendError> {
        self.cmd_tx.send(cmd).map_err(|_| SendError::NotConnected)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatConfig;

    #[test]
    fn test_reply_into_response() {
        let response = JsonRpcResponse::success(json!(1), Id::Number(1));
        assert_eq!(Reply::Response(response.clone()).into_response(), Some(response));
        assert_eq!(Reply::Ack.into_response(), None);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url_without_dialing() {
        let err = Connection::connect("http://localhost:1", ConnectConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, ConnectError::UnsupportedScheme("http".into()));

        let err = Connection::connect("::nope::", ConnectConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_zero_heartbeat_interval() {
        let config = ConnectConfig::default().with_heartbeat(HeartbeatConfig::ping(Duration::ZERO));
        let err = Connection::connect("ws://127.0.0.1:1", config).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_header() {
        let config = ConnectConfig::default().with_header("bad header", "x");
        let err = Connection::connect("ws://127.0.0.1:1", config).await.unwrap_err();
        assert!(matches!(err, ConnectError::InvalidConfig(_)));
    }
}
