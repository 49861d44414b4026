//! Wire-level building blocks for tether
//!
//! - **Types**: JSON-RPC 2.0 requests, notifications and correlated responses
//! - **Codec**: frame classification and message encoding
//! - **Error handling**: connect, send and decode failure taxonomies
//! - **Observability**: OpenTelemetry and `tracing` pipeline setup
//!
//! Nothing here touches the network. `tether-client` owns the socket and
//! feeds frames through [`codec::decode_frame`].
//!
//! # Example
//!
//! ```rust
//! use tether_core::{codec, Id, JsonRpcRequest};
//!
//! let request = JsonRpcRequest::new("public/test", None, Id::Number(1));
//! let text = codec::encode(&request).unwrap();
//!
//! match codec::decode_text(r#"{"jsonrpc":"2.0","id":1,"result":{"version":"1.2.26"}}"#).unwrap() {
//!     codec::Inbound::Response { id, .. } => assert_eq!(id, request.id),
//!     other => panic!("unexpected {:?}", other),
//! }
//! assert!(text.contains("public/test"));
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use codec::{CloseFrame, ControlFrame, Frame, Inbound};
pub use error::{ConnectError, DecodeError, Error, FailureCategory, JsonRpcErrorData, Result, SendError};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{Id, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
