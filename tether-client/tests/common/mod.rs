//! Common test utilities for tether-client integration tests
//!
//! [`MockWsServer`] is a scripted JSON-RPC peer: every inbound text frame is
//! passed to a handler that decides what to send back, and the test can push
//! frames or drop every live socket at any time.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_client::{ConnectConfig, Connection, ConnectionState, LifecycleEvent};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// What the mock does in response to one inbound message
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a text frame
    Send(String),
    /// Send a close frame and stop serving this socket
    Close,
}

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Ping(Vec<u8>),
    DropAll,
}

type Handler = Arc<dyn Fn(&Value) -> Vec<Action> + Send + Sync>;

/// Mock WebSocket server for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    control: broadcast::Sender<Control>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    message_rx: mpsc::UnboundedReceiver<String>,
    accepted: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Answer every request with `{"result": "ok"}`
    pub async fn new() -> Self {
        Self::with_handler(respond_ok).await
    }

    /// Start on an ephemeral port with a custom handler
    pub async fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Action> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    /// Start on a specific address
    pub async fn bind<F>(addr: SocketAddr, handler: F) -> Self
    where
        F: Fn(&Value) -> Vec<Action> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, Arc::new(handler))
    }

    fn serve(listener: TcpListener, handler: Handler) -> Self {
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (msg_tx, message_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));

        let control_tx = control.clone();
        let accepted_count = Arc::clone(&accepted);
        let pong_count = Arc::clone(&pongs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        let Ok(ws) = accept_async(stream).await else { continue };
                        accepted_count.fetch_add(1, Ordering::SeqCst);

                        let handler = Arc::clone(&handler);
                        let msg_tx = msg_tx.clone();
                        let control_rx = control_tx.subscribe();
                        let pongs = Arc::clone(&pong_count);
                        tokio::spawn(serve_socket(ws, handler, msg_tx, control_rx, pongs));
                    }
                }
            }
        });

        Self {
            addr,
            control,
            shutdown_tx: Some(shutdown_tx),
            message_rx,
            accepted,
            pongs,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of completed handshakes
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Send a text frame to every live socket
    pub fn push(&self, text: String) {
        let _ = self.control.send(Control::Push(text));
    }

    /// Number of pong frames received from clients
    pub fn pongs(&self) -> usize {
        self.pongs.load(Ordering::SeqCst)
    }

    /// Send a ping frame to every live socket
    pub fn ping(&self, payload: Vec<u8>) {
        let _ = self.control.send(Control::Ping(payload));
    }

    /// Drop every live socket without a close handshake; keep listening
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::DropAll);
    }

    /// Next text frame the server received, or `None` after 5 s
    pub async fn wait_for_message(&mut self) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
            .and_then(|text| serde_json::from_str(&text).ok())
    }

    /// Stop listening and drop every live socket; later dials are refused
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.drop_connections();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn serve_socket(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    handler: Handler,
    msg_tx: mpsc::UnboundedSender<String>,
    mut control_rx: broadcast::Receiver<Control>,
    pongs: Arc<AtomicUsize>,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = msg_tx.send(text.clone());
                    let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    for action in handler(&value) {
                        match action {
                            Action::Send(reply) => {
                                let _ = write.send(Message::Text(reply)).await;
                            }
                            Action::Close => {
                                let _ = write.close().await;
                                return;
                            }
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    pongs.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            control = control_rx.recv() => match control {
                Ok(Control::Push(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(Control::Ping(payload)) => {
                    let _ = write.send(Message::Ping(payload)).await;
                }
                Ok(Control::DropAll) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

/// Default handler: `{"result": "ok"}` for anything with an id
pub fn respond_ok(request: &Value) -> Vec<Action> {
    match request.get("id") {
        Some(id) if !id.is_null() => vec![Action::Send(
            serde_json::json!({"jsonrpc": "2.0", "id": id, "result": "ok"}).to_string(),
        )],
        _ => Vec::new(),
    }
}

/// Handler that never answers
pub fn silent(_: &Value) -> Vec<Action> {
    Vec::new()
}

/// Build a JSON-RPC success response
pub fn mock_response(id: &Value, result: Value) -> String {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

/// Build a JSON-RPC error response
pub fn mock_error_response(id: &Value, code: i64, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message}
    })
    .to_string()
}

/// Build a JSON-RPC notification
pub fn mock_notification(method: &str, params: Value) -> String {
    serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string()
}

/// Route client logs to the test harness; set `RUST_LOG` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with short delays for tests
pub fn fast_config() -> ConnectConfig {
    ConnectConfig::default()
        .with_retry_delay(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_secs(2))
        .with_close_grace(Duration::from_millis(200))
        .with_request_timeout(Duration::from_secs(5))
}

/// Event channel wired into `on_event`
pub fn event_recorder() -> (
    impl Fn(LifecycleEvent) -> std::future::Ready<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let record = move |event: LifecycleEvent| {
        let _ = tx.send(event);
        std::future::ready(())
    };
    (record, rx)
}

/// Next lifecycle event, failing the test after 5 s
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<LifecycleEvent>) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for lifecycle event")
        .expect("event channel closed")
}

/// Wait until the connection reports `state`, failing after 5 s
pub async fn wait_for_state(conn: &Connection, state: ConnectionState) {
    let mut changes = conn.state_changes();
    tokio::time::timeout(Duration::from_secs(5), changes.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// A loopback address nothing is listening on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
