//! JSON-RPC 2.0 message shapes used on the wire
//!
//! Only the shapes a trading client actually produces or consumes live here:
//! outbound requests and notifications, and inbound responses. Inbound
//! traffic is not deserialized straight into these types; the codec first
//! classifies each frame (see [`crate::codec::Inbound`]) and builds a
//! [`JsonRpcResponse`] only for frames that correlate with a request.
//!
//! # Request IDs
//!
//! Exchanges echo the request `id` verbatim. Most use integers, a few accept
//! strings, so [`Id`] keeps both. Correlation keys on the exact variant:
//! `1` and `"1"` are different ids.

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC protocol version string sent on every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request ID
///
/// Serialized untagged so it appears on the wire as a bare number, string or
/// `null`. Implements `Hash` + `Eq` so it can key the pending-request map.
///
/// # Examples
///
/// ```rust
/// use tether_core::Id;
///
/// let numeric: Id = 42u64.into();
/// let named: Id = "auth-1".into();
///
/// assert_eq!(numeric.to_string(), "42");
/// assert_eq!(named.to_string(), "\"auth-1\"");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier
    String(String),
    /// Numeric identifier, the form generated by the client
    Number(i64),
    /// Null identifier; never correlated
    Null,
}

impl Id {
    /// Parse an id out of a raw JSON value
    ///
    /// Returns `None` for values that are not valid JSON-RPC ids (objects,
    /// arrays, booleans, fractional numbers).
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Id::Null),
            serde_json::Value::String(s) => Some(Id::String(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(Id::Number),
            _ => None,
        }
    }

    /// Whether this id can be used to correlate a response
    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<u64> for Id {
    /// Ids above `i64::MAX` saturate; a per-connection counter never gets there.
    fn from(n: u64) -> Self {
        Id::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

/// Outbound JSON-RPC 2.0 request
///
/// ```rust
/// use tether_core::{Id, JsonRpcRequest};
/// use serde_json::json;
///
/// let req = JsonRpcRequest::new(
///     "public/get_order_book",
///     Some(json!({"instrument_name": "BTC-PERPETUAL"})),
///     Id::Number(7),
/// );
/// assert_eq!(req.jsonrpc, "2.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Correlation id echoed back by the peer
    pub id: Id,
    /// Remote method name
    pub method: String,
    /// Method parameters, omitted from the wire when `None`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new request with `jsonrpc` set to "2.0"
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound JSON-RPC 2.0 notification (no `id`, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Method or event name
    pub method: String,
    /// Optional payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new notification with `jsonrpc` set to "2.0"
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A correlated JSON-RPC 2.0 response
///
/// Exactly one of `result` / `error` is set. Responses built by the codec
/// always satisfy this; the constructors below keep it true for tests and
/// mock peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Successful result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Peer-reported failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    /// Id of the request this answers
    pub id: Id,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(result: serde_json::Value, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response
    pub fn error(error: JsonRpcErrorData, id: Id) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Build a response from a classified outcome
    pub fn from_outcome(id: Id, outcome: Result<serde_json::Value, JsonRpcErrorData>) -> Self {
        match outcome {
            Ok(result) => Self::success(result, id),
            Err(error) => Self::error(error, id),
        }
    }

    /// True when `result` is present
    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// True when `error` is present
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split into the result value or the peer error
    pub fn into_outcome(self) -> Result<serde_json::Value, JsonRpcErrorData> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }
}
