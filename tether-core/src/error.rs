//! Error types for tether
//!
//! Errors are split by where a caller meets them:
//!
//! - [`ConnectError`]: returned once from `connect`, and carried by
//!   `ConnectionFailed` lifecycle events on later reconnect attempts
//! - [`SendError`]: returned per call from `send_message` and friends
//! - [`DecodeError`]: internal to the read path; logged and skipped unless the
//!   malformed frame was the response a caller is waiting for
//! - [`JsonRpcErrorData`]: the wire-format error object a peer returns
//!
//! [`Error`] wraps all of them for APIs that can fail in more than one way.

use crate::types::Id;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classes reported with connection failures
///
/// Everything except `Exhausted` is retried on the backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// DNS, TCP, TLS or IO failure, including connect timeouts
    Network,
    /// Malformed handshake or frame-level protocol violation
    Protocol,
    /// The peer rejected the handshake (HTTP 401/403)
    Auth,
    /// Retry budget consumed; terminal
    Exhausted,
}

impl FailureCategory {
    /// Lower-case label used in logs and metric attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Network => "network",
            FailureCategory::Protocol => "protocol",
            FailureCategory::Auth => "auth",
            FailureCategory::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to establish (or re-establish) a connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The URL could not be parsed or has no host
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Only `ws` and `wss` are accepted
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// A configured option (e.g. a header) cannot be used
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The handshake did not complete within the connect timeout
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// DNS, TCP, TLS or IO failure
    #[error("network error: {0}")]
    Network(String),

    /// Handshake or framing protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake rejected by the peer
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Every allowed attempt failed
    #[error("connection attempts exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Number of dial attempts made since the last successful connection
        attempts: u32,
        /// Failure of the final attempt
        last: Box<ConnectError>,
    },
}

impl ConnectError {
    /// Failure category used for lifecycle events and retry decisions
    pub fn category(&self) -> FailureCategory {
        match self {
            ConnectError::Timeout(_) | ConnectError::Network(_) => FailureCategory::Network,
            ConnectError::Auth(_) => FailureCategory::Auth,
            ConnectError::Exhausted { .. } => FailureCategory::Exhausted,
            ConnectError::InvalidUrl(_)
            | ConnectError::UnsupportedScheme(_)
            | ConnectError::InvalidConfig(_)
            | ConnectError::Protocol(_) => FailureCategory::Protocol,
        }
    }

    /// Whether the error is detected before dialing and must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectError::InvalidUrl(_)
                | ConnectError::UnsupportedScheme(_)
                | ConnectError::InvalidConfig(_)
                | ConnectError::Exhausted { .. }
        )
    }
}

/// Per-call failure of `send_message`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is not in the `Connected` state
    #[error("not connected")]
    NotConnected,

    /// The payload could not be encoded or carries an unusable id
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Writing the frame to the transport failed
    #[error("transport closed: {0}")]
    TransportClosed(String),

    /// No response arrived before the request deadline
    #[error("request timed out")]
    Timeout,

    /// The connection dropped or was closed while the request was pending
    #[error("connection closed")]
    ConnectionClosed,

    /// A request with this id is already outstanding
    #[error("duplicate request id: {0}")]
    DuplicateId(Id),

    /// The awaited response arrived but could not be decoded
    #[error("response decode failed: {0}")]
    DecodeFailed(String),
}

/// Read-path decode failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload bytes are not valid UTF-8
    #[error("invalid utf-8 payload")]
    InvalidUtf8,

    /// Payload is not valid JSON
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Object carries an id but is not a well-formed response
    #[error("malformed response for id {id}: {reason}")]
    MalformedResponse {
        /// Id found in the frame
        id: Id,
        /// What was wrong with it
        reason: String,
    },

    /// A JSON array with no elements
    #[error("empty batch")]
    EmptyBatch,

    /// Control frame shorter than its mandatory fields
    #[error("truncated control frame")]
    TruncatedControl,
}

/// Umbrella error for APIs that can fail in several ways
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Connection establishment failure
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Send-side failure
    #[error(transparent)]
    Send(#[from] SendError),

    /// Frame decode failure
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Error object returned by the peer for a request
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// Typed result conversion failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// JSON-RPC 2.0 error object as it appears on the wire
///
/// Exchanges use their own positive codes on top of the reserved
/// `-32768..=-32000` range, e.g. `10028` for "too many requests".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code
    pub code: i64,
    /// Short description
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    /// Create an error with code and message
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying additional data
    pub fn with_data(code: i64, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}
