//! Frame codec: wire frames in, classified messages out
//!
//! The codec is stateless. It converts between WebSocket frames and the
//! closed set of things the client cares about:
//!
//! - [`Inbound::Response`]: correlates with a pending request by id
//! - [`Inbound::Notification`]: anything unsolicited, forwarded verbatim
//! - [`Inbound::Control`]: ping/pong/close
//! - [`Inbound::Batch`]: a JSON array, each element classified on its own, so
//!   one malformed element does not hide the others
//!
//! Shape inspection happens once, here, so the owner task only ever matches
//! on variants.
//!
//! # Classification rules
//!
//! | JSON object                                 | Result                     |
//! |---------------------------------------------|----------------------------|
//! | has `method`                                | `Notification`             |
//! | non-null `id` + `result`                    | `Response(Ok)`             |
//! | non-null `id` + well-formed `error`         | `Response(Err)`            |
//! | non-null `id`, neither / malformed `error`  | `DecodeError::MalformedResponse` |
//! | anything else                               | `Notification`             |
//!
//! # Examples
//!
//! ```rust
//! use tether_core::codec::{decode_text, Inbound};
//! use tether_core::Id;
//!
//! let inbound = decode_text(r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#).unwrap();
//! match inbound {
//!     Inbound::Response { id, outcome } => {
//!         assert_eq!(id, Id::Number(1));
//!         assert_eq!(outcome.unwrap(), "pong");
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::error::{DecodeError, JsonRpcErrorData, SendError};
use crate::types::Id;
use serde::Serialize;
use serde_json::Value;

/// Normal closure status code
pub const CLOSE_NORMAL: u16 = 1000;

/// A WebSocket frame as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text payload
    Text(String),
    /// Binary payload; some venues ship JSON this way
    Binary(Vec<u8>),
    /// Ping control frame
    Ping(Vec<u8>),
    /// Pong control frame
    Pong(Vec<u8>),
    /// Close control frame
    Close(Option<CloseFrame>),
}

/// Status code and reason carried by a close frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// RFC 6455 status code
    pub code: u16,
    /// Human-readable reason, possibly empty
    pub reason: String,
}

impl CloseFrame {
    /// Normal closure with an empty reason
    pub fn normal() -> Self {
        Self {
            code: CLOSE_NORMAL,
            reason: String::new(),
        }
    }
}

/// Control frame kinds surfaced by [`decode_frame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Peer ping; the socket layer answers it
    Ping(Vec<u8>),
    /// Pong, usually answering our keepalive
    Pong(Vec<u8>),
    /// Peer closed the connection
    Close(Option<CloseFrame>),
}

/// Outcome carried by a correlated response
pub type Outcome = Result<Value, JsonRpcErrorData>;

/// A classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response correlated by id
    Response {
        /// Id echoed by the peer
        id: Id,
        /// `result` or `error`
        outcome: Outcome,
    },
    /// Unsolicited message, forwarded verbatim
    Notification(Value),
    /// Ping, pong or close
    Control(ControlFrame),
    /// Elements of a JSON array, in order, each classified independently
    Batch(Vec<Result<Inbound, DecodeError>>),
}

impl Frame {
    /// Parse a raw close-frame payload
    ///
    /// An empty payload is a close without status. A single byte cannot hold
    /// the two-byte status code and is rejected.
    pub fn close_from_payload(payload: &[u8]) -> Result<Frame, DecodeError> {
        match payload {
            [] => Ok(Frame::Close(None)),
            [_] => Err(DecodeError::TruncatedControl),
            [hi, lo, reason @ ..] => {
                let reason = std::str::from_utf8(reason).map_err(|_| DecodeError::InvalidUtf8)?;
                Ok(Frame::Close(Some(CloseFrame {
                    code: u16::from_be_bytes([*hi, *lo]),
                    reason: reason.to_string(),
                })))
            }
        }
    }

    /// Raw close-frame payload (inverse of [`Frame::close_from_payload`])
    pub fn close_payload(close: Option<&CloseFrame>) -> Vec<u8> {
        match close {
            None => Vec::new(),
            Some(frame) => {
                let mut payload = frame.code.to_be_bytes().to_vec();
                payload.extend_from_slice(frame.reason.as_bytes());
                payload
            }
        }
    }

    /// JSON text carried by a data frame
    ///
    /// Returns `Ok(None)` for control frames.
    pub fn payload_text(&self) -> Result<Option<&str>, DecodeError> {
        match self {
            Frame::Text(text) => Ok(Some(text.as_str())),
            Frame::Binary(bytes) => std::str::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) => Ok(None),
        }
    }

    /// Whether this is a ping, pong or close frame
    pub fn is_control(&self) -> bool {
        matches!(self, Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_))
    }
}

/// Classify a frame
pub fn decode_frame(frame: Frame) -> Result<Inbound, DecodeError> {
    match frame {
        Frame::Ping(payload) => Ok(Inbound::Control(ControlFrame::Ping(payload))),
        Frame::Pong(payload) => Ok(Inbound::Control(ControlFrame::Pong(payload))),
        Frame::Close(close) => Ok(Inbound::Control(ControlFrame::Close(close))),
        Frame::Text(text) => decode_text(&text),
        Frame::Binary(bytes) => {
            let text = std::str::from_utf8(&bytes).map_err(|_| DecodeError::InvalidUtf8)?;
            decode_text(text)
        }
    }
}

/// Classify a JSON text payload
pub fn decode_text(text: &str) -> Result<Inbound, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    classify(value)
}

/// Classify an already-parsed JSON value
pub fn classify(value: Value) -> Result<Inbound, DecodeError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(DecodeError::EmptyBatch);
            }
            Ok(Inbound::Batch(items.into_iter().map(classify).collect()))
        }
        Value::Object(mut map) => {
            if map.contains_key("method") {
                return Ok(Inbound::Notification(Value::Object(map)));
            }

            let id = match map.get("id").and_then(Id::from_value) {
                Some(id) if !id.is_null() => id,
                _ => return Ok(Inbound::Notification(Value::Object(map))),
            };

            if let Some(error) = map.remove("error") {
                let error: JsonRpcErrorData =
                    serde_json::from_value(error).map_err(|e| DecodeError::MalformedResponse {
                        id: id.clone(),
                        reason: format!("invalid error object: {}", e),
                    })?;
                return Ok(Inbound::Response {
                    id,
                    outcome: Err(error),
                });
            }

            match map.remove("result") {
                Some(result) => Ok(Inbound::Response {
                    id,
                    outcome: Ok(result),
                }),
                None => Err(DecodeError::MalformedResponse {
                    id,
                    reason: "neither result nor error present".to_string(),
                }),
            }
        }
        other => Ok(Inbound::Notification(other)),
    }
}

/// Encode a serializable message to JSON text
pub fn encode<T: Serialize>(msg: &T) -> Result<String, SendError> {
    serde_json::to_string(msg).map_err(|e| SendError::EncodeFailed(e.to_string()))
}

/// Extract the correlation id of an outbound payload
///
/// `Ok(None)` means the payload is fire-and-forget (no `id`, or `id: null`).
/// An `id` that is not a number or string is rejected.
pub fn request_id(payload: &Value) -> Result<Option<Id>, SendError> {
    match payload.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => match Id::from_value(raw) {
            Some(id) => Ok(Some(id)),
            None => Err(SendError::EncodeFailed(format!("unusable request id: {}", raw))),
        },
    }
}
