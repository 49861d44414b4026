//! tether - reconnecting JSON-RPC 2.0 over WebSocket
//!
//! Convenience crate that re-exports the tether sub-crates. Depend on this
//! one if you want a single dependency for the whole client.
//!
//! # Architecture
//!
//! - **tether-core**: JSON-RPC types, frame codec, error taxonomy, observability
//! - **tether-client**: connection state machine, backoff, request correlation,
//!   heartbeat and observer callbacks
//!
//! Exchange adapters sit on top: they own authentication, channel naming
//! and re-subscription after [`LifecycleEvent::Connected`] with
//! `reconnected: true`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::{ClientBuilder, ConnectConfig, HeartbeatConfig, LifecycleEvent};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tracing_subscriber::fmt::init();
//!
//!     let conn = ClientBuilder::new("wss://www.deribit.com/ws/api/v2")
//!         .with_config(
//!             ConnectConfig::default()
//!                 .with_jitter()
//!                 .with_heartbeat(HeartbeatConfig::request("public/test", Duration::from_secs(15))),
//!         )
//!         .on_notification("subscription", |msg| async move {
//!             println!("{}: {}", msg["params"]["channel"], msg["params"]["data"]);
//!         })
//!         .on_event(|event| async move {
//!             if let LifecycleEvent::Closed { reason } = event {
//!                 eprintln!("connection closed: {:?}", reason);
//!             }
//!         })
//!         .connect()
//!         .await?;
//!
//!     conn.subscribe(["ticker.BTC-PERPETUAL.100ms"]).await?;
//!     tokio::signal::ctrl_c().await?;
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub use tether_client as client;
pub use tether_core as core;

pub use tether_client::{
    ClientBuilder, CloseReason, ConnectConfig, Connection, ConnectionState, ConnectionStatus,
    HeartbeatConfig, HeartbeatKind, LifecycleEvent, Reply,
};
pub use tether_core::{ConnectError, Error, FailureCategory, Id, SendError};
