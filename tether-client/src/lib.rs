//! Reconnecting JSON-RPC 2.0 client over WebSocket
//!
//! Built for exchange APIs that speak JSON-RPC over a single long-lived
//! socket: requests are correlated with responses by id, unsolicited pushes
//! go to observer callbacks, and the connection redials on its own with
//! exponential backoff.
//!
//! # Core Features
//!
//! - **Reconnection**: `Disconnected → Connecting → Connected ⇄ Reconnecting → Closed`
//!   with capped exponential backoff and optional jitter
//! - **Correlation**: exactly one outcome per request (response, peer error,
//!   timeout or connection loss)
//! - **Heartbeat**: ping frames or application-level test requests, with a
//!   silence deadline
//! - **Observer**: per-method message handlers and lifecycle events
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ConnectConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conn = ClientBuilder::new("wss://test.deribit.com/ws/api/v2")
//!         .with_config(ConnectConfig::default())
//!         .on_notification("subscription", |msg| async move {
//!             println!("{}", msg["params"]["channel"]);
//!         })
//!         .connect()
//!         .await?;
//!
//!     conn.subscribe(["book.BTC-PERPETUAL.100ms"]).await?;
//!     let time: u64 = conn.request("public/get_time", json!({})).await?;
//!     println!("server time {}", time);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

mod backoff;
mod client;
mod client_builder;
mod config;
mod connection_state;
mod controller;
mod correlation;
mod metrics;
mod observer;
mod transport;

pub use backoff::BackoffSchedule;
pub use client::{Connection, Reply};
pub use client_builder::ClientBuilder;
pub use config::{
    ConnectConfig, HeartbeatConfig, HeartbeatKind, DEFAULT_SUBSCRIBE_METHOD, DEFAULT_UNSUBSCRIBE_METHOD,
};
pub use connection_state::{CloseReason, ConnectionState, ConnectionStatus, LifecycleEvent, PendingInfo};
pub use metrics::{state_code, ClientMetrics};
pub use observer::{EventFn, MessageFn, Observer};
pub use transport::validate_url;
