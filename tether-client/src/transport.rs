//! WebSocket transport
//!
//! A [`Transport`] is one live socket. It is created by [`dial`], owned by
//! exactly one connection task, and dropped on disconnect; reconnecting
//! means dialing a fresh one. Frames cross this boundary as
//! [`tether_core::Frame`], so nothing above this module sees tungstenite
//! types.

use crate::config::ConnectConfig;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tether_core::{ConnectError, Frame, SendError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the read side stopped producing frames
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    /// The stream ended without an error
    #[error("stream ended")]
    Ended,
    /// Socket or protocol failure
    #[error("{0}")]
    Socket(String),
}

/// One live WebSocket
pub(crate) struct Transport {
    ws: WsStream,
}

/// Parse and validate a connection URL without dialing
pub fn validate_url(raw: &str) -> Result<Url, ConnectError> {
    let url = Url::parse(raw).map_err(|e| ConnectError::InvalidUrl(format!("{}: {}", raw, e)))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ConnectError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConnectError::InvalidUrl(format!("{}: missing host", raw)));
    }

    Ok(url)
}

/// Build the upgrade request with configured headers
pub(crate) fn build_request(url: &Url, headers: &[(String, String)]) -> Result<Request, ConnectError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConnectError::InvalidConfig(format!("header name {:?}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ConnectError::InvalidConfig(format!("header {:?} value: {}", name, e)))?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(request)
}

/// Dial `url` within the configured connect timeout
#[tracing::instrument(skip(url, config), fields(url = %url))]
pub(crate) async fn dial(url: &Url, config: &ConnectConfig) -> Result<Transport, ConnectError> {
    let request = build_request(url, &config.headers)?;

    let (ws, response) = tokio::time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))?
        .map_err(categorize)?;

    tracing::debug!(status = response.status().as_u16(), "websocket handshake complete");
    Ok(Transport { ws })
}

/// Map a handshake failure onto the connect error taxonomy
pub(crate) fn categorize(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            match status.as_u16() {
                401 | 403 => ConnectError::Auth(format!("handshake rejected with HTTP {}", status)),
                _ => ConnectError::Protocol(format!("handshake rejected with HTTP {}", status)),
            }
        }
        tungstenite::Error::Io(e) => ConnectError::Network(e.to_string()),
        tungstenite::Error::Tls(e) => ConnectError::Network(e.to_string()),
        tungstenite::Error::Url(e) => ConnectError::InvalidUrl(e.to_string()),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnectError::Network("connection closed during handshake".to_string())
        }
        other => ConnectError::Protocol(other.to_string()),
    }
}

impl Transport {
    /// Write one frame
    pub async fn send(&mut self, frame: Frame) -> Result<(), SendError> {
        self.ws
            .send(to_message(frame))
            .await
            .map_err(|e| SendError::TransportClosed(e.to_string()))
    }

    /// Read the next frame
    pub async fn recv(&mut self) -> Result<Frame, TransportError> {
        loop {
            match self.ws.next().await {
                Some(Ok(message)) => {
                    if let Some(frame) = from_message(message) {
                        return Ok(frame);
                    }
                }
                Some(Err(e)) => return Err(TransportError::Socket(e.to_string())),
                None => return Err(TransportError::Ended),
            }
        }
    }
}

/// Convert a frame into a tungstenite message
pub(crate) fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close(close) => Message::Close(close.map(|c| WsCloseFrame {
            code: CloseCode::from(c.code),
            reason: Cow::Owned(c.reason),
        })),
    }
}

/// Convert a tungstenite message into a frame; raw frames are not surfaced
pub(crate) fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Ping(payload) => Some(Frame::Ping(payload)),
        Message::Pong(payload) => Some(Frame::Pong(payload)),
        Message::Close(close) => Some(Frame::Close(close.map(|c| tether_core::CloseFrame {
            code: u16::from(c.code),
            reason: c.reason.into_owned(),
        }))),
        Message::Frame(_) => None,
    }
}
