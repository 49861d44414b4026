//! Observer callbacks for unsolicited messages and lifecycle events
//!
//! Handlers are async functions registered through
//! [`ClientBuilder`](crate::ClientBuilder). The owner task never awaits them:
//! it pushes each item onto an unbounded queue drained by a dedicated
//! dispatcher task, which runs handlers one at a time in arrival order. A
//! slow handler delays later callbacks but never the socket.
//!
//! Routing for messages: the handler registered for the message's `method`
//! if any, else the catch-all message handler, else the message is logged at
//! debug level and dropped.
//!
//! ```rust,no_run
//! use tether_client::ClientBuilder;
//!
//! # async fn example() -> Result<(), tether_core::ConnectError> {
//! let conn = ClientBuilder::new("wss://test.deribit.com/ws/api/v2")
//!     .on_notification("subscription", |msg| async move {
//!         println!("channel {}: {}", msg["params"]["channel"], msg["params"]["data"]);
//!     })
//!     .on_event(|event| async move {
//!         println!("lifecycle: {:?}", event);
//!     })
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::connection_state::LifecycleEvent;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler for unsolicited messages; receives the message verbatim
pub type MessageFn = Arc<dyn Fn(Value) -> BoxFuture + Send + Sync>;

/// Handler for lifecycle events
pub type EventFn = Arc<dyn Fn(LifecycleEvent) -> BoxFuture + Send + Sync>;

/// Item queued for the dispatcher task
#[derive(Debug)]
pub(crate) enum Dispatch {
    Message(Value),
    Event(LifecycleEvent),
}

/// Registered handlers for one connection
#[derive(Clone, Default)]
pub struct Observer {
    by_method: HashMap<String, MessageFn>,
    catch_all: Option<MessageFn>,
    on_event: Option<EventFn>,
}

impl Observer {
    /// Observer with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle messages whose `method` equals `method`
    pub fn on_notification<F, Fut>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageFn = Arc::new(move |msg| Box::pin(handler(msg)));
        self.by_method.insert(method.into(), handler);
    }

    /// Handle every message no method handler claims
    pub fn on_message<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.catch_all = Some(Arc::new(move |msg| Box::pin(handler(msg))));
    }

    /// Handle lifecycle events
    pub fn on_event<F, Fut>(&mut self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_event = Some(Arc::new(move |event| Box::pin(handler(event))));
    }

    /// Whether a method-specific handler exists
    pub fn has_handler(&self, method: &str) -> bool {
        self.by_method.contains_key(method)
    }

    pub(crate) async fn dispatch(&self, item: Dispatch) {
        match item {
            Dispatch::Message(msg) => {
                let method = msg.get("method").and_then(Value::as_str).map(str::to_owned);
                let handler = method
                    .as_deref()
                    .and_then(|m| self.by_method.get(m))
                    .or(self.catch_all.as_ref());

                match handler {
                    Some(handler) => handler(msg).await,
                    None => tracing::debug!(method = ?method, "no handler for message"),
                }
            }
            Dispatch::Event(event) => {
                if let Some(ref handler) = self.on_event {
                    handler(event).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("methods", &self.by_method.keys().collect::<Vec<_>>())
            .field("catch_all", &self.catch_all.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

/// Start the dispatcher task; it exits once every sender is dropped
pub(crate) fn spawn_dispatcher(observer: Observer) -> mpsc::UnboundedSender<Dispatch> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            observer.dispatch(item).await;
        }
    });
    tx
}
