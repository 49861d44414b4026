//! Connection owner task
//!
//! One [`Controller`] runs per connection. It owns the transport, the
//! correlation table and the retry counters, and is the only code that
//! changes any of them. Handles talk to it over an unbounded command
//! channel; it answers on one-shot channels and publishes its state through
//! a `watch` channel.
//!
//! The task alternates between three phases:
//!
//! - **dial**: one connect attempt, racing incoming commands
//! - **serve**: the connected loop (commands, inbound frames, request
//!   timers, heartbeat)
//! - **backoff**: waiting out the retry delay, racing incoming commands
//!
//! and exits after reaching `Closed`.

use crate::backoff::BackoffSchedule;
use crate::config::{ConnectConfig, HeartbeatKind};
use crate::connection_state::{CloseReason, ConnectionState, ConnectionStatus, LifecycleEvent};
use crate::correlation::{deadline_after, CorrelationManager, Expiry, ReplySlot};
use crate::metrics::ClientMetrics;
use crate::observer::Dispatch;
use crate::transport::{self, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_core::codec::{self, ControlFrame, Inbound};
use tether_core::{
    CloseFrame, ConnectError, DecodeError, FailureCategory, Frame, Id, JsonRpcRequest, JsonRpcResponse,
    SendError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

/// How an outbound message expects to be answered
pub(crate) enum Outbound {
    /// Written and acknowledged; no response expected
    Fire {
        ack: oneshot::Sender<Result<(), SendError>>,
    },
    /// Registered for correlation before it is written
    Correlated {
        id: Id,
        timeout: Duration,
        reply: ReplySlot,
    },
}

/// Requests from handles to the owner task
pub(crate) enum Command {
    Send { text: String, outbound: Outbound },
    Status { reply: oneshot::Sender<ConnectionStatus> },
    Close { done: oneshot::Sender<()> },
}

/// Channels and shared pieces the owner task is built from
pub(crate) struct ControllerParts {
    pub url: Url,
    pub config: ConnectConfig,
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub state_tx: watch::Sender<ConnectionState>,
    pub events: mpsc::UnboundedSender<Dispatch>,
    pub ids: Arc<AtomicU64>,
    pub metrics: Option<Arc<ClientMetrics>>,
    pub ready: oneshot::Sender<Result<(), ConnectError>>,
}

/// Result of one dial
enum Dialed {
    Up(Transport),
    Failed(ConnectError),
    Close(Option<oneshot::Sender<()>>),
}

/// Why the connected loop returned
enum Exit {
    Dropped(String),
    Close(Option<oneshot::Sender<()>>),
}

/// Outcome of a backoff wait
enum Waited {
    Elapsed,
    Close(Option<oneshot::Sender<()>>),
}

pub(crate) struct Controller {
    url: Url,
    config: ConnectConfig,
    backoff: BackoffSchedule,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    expiry_rx: mpsc::UnboundedReceiver<Expiry>,
    state_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<Dispatch>,
    correlation: CorrelationManager,
    ids: Arc<AtomicU64>,
    metrics: Option<Arc<ClientMetrics>>,
    ready: Option<oneshot::Sender<Result<(), ConnectError>>>,
    retry_count: u32,
    attempts: u32,
    ever_connected: bool,
}

impl Controller {
    pub fn new(parts: ControllerParts) -> Self {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        Self {
            backoff: BackoffSchedule::from_config(&parts.config),
            url: parts.url,
            config: parts.config,
            cmd_rx: parts.cmd_rx,
            expiry_rx,
            state_tx: parts.state_tx,
            events: parts.events,
            correlation: CorrelationManager::new(expiry_tx),
            ids: parts.ids,
            metrics: parts.metrics,
            ready: Some(parts.ready),
            retry_count: 0,
            attempts: 0,
            ever_connected: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.attempts += 1;

            match self.dial().await {
                Dialed::Up(mut transport) => {
                    self.on_connected();
                    match self.serve(&mut transport).await {
                        Exit::Close(done) => {
                            self.close_gracefully(transport).await;
                            self.finish(CloseReason::Requested, done);
                            return;
                        }
                        Exit::Dropped(reason) => {
                            drop(transport);
                            tracing::warn!(reason = %reason, "connection dropped");
                            if let Some(ref m) = self.metrics {
                                m.record_error("connection_dropped");
                            }

                            let plan = self.schedule_retry(ConnectError::Network(reason));
                            if plan.is_ok() {
                                self.set_state(ConnectionState::Reconnecting);
                            }
                            self.correlation.fail_all(SendError::ConnectionClosed);
                            self.record_pending();

                            if !self.follow(plan).await {
                                return;
                            }
                        }
                    }
                }
                Dialed::Failed(error) => {
                    let category = error.category();
                    tracing::warn!(error = %error, category = %category, attempt = self.attempts, "connect attempt failed");
                    if let Some(ref m) = self.metrics {
                        m.record_connect_failure(category);
                    }
                    self.emit(LifecycleEvent::ConnectionFailed {
                        category,
                        error: error.clone(),
                    });

                    let plan = self.schedule_retry(error);
                    if !self.follow(plan).await {
                        return;
                    }
                }
                Dialed::Close(done) => {
                    tracing::debug!("close requested while dialing");
                    self.finish(CloseReason::Requested, done);
                    return;
                }
            }
        }
    }

    async fn dial(&mut self) -> Dialed {
        let url = self.url.clone();
        let config = self.config.clone();
        let dial = transport::dial(&url, &config);
        tokio::pin!(dial);

        loop {
            tokio::select! {
                result = &mut dial => {
                    return match result {
                        Ok(transport) => Dialed::Up(transport),
                        Err(error) => Dialed::Failed(error),
                    };
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Dialed::Close(None),
                    Some(Command::Close { done }) => return Dialed::Close(Some(done)),
                    Some(other) => self.answer_offline(other),
                },
            }
        }
    }

    fn on_connected(&mut self) {
        let reconnected = self.ever_connected;
        self.ever_connected = true;
        self.retry_count = 0;
        self.attempts = 0;
        self.correlation.reopen();
        self.set_state(ConnectionState::Connected);

        tracing::info!(url = %self.url, reconnected, "connected");
        if reconnected {
            if let Some(ref m) = self.metrics {
                m.record_reconnection_success();
            }
        }
        self.emit(LifecycleEvent::Connected { reconnected });

        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }
    }

    async fn serve(&mut self, transport: &mut Transport) -> Exit {
        let heartbeat = self.config.heartbeat.clone();
        let period = heartbeat
            .as_ref()
            .map_or(Duration::from_secs(3600), |hb| hb.interval);
        let mut ticker = tokio::time::interval_at(deadline_after(Instant::now(), period), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive_deadline: Option<Instant> = None;

        loop {
            let deadline = keepalive_deadline.unwrap_or_else(|| deadline_after(Instant::now(), period));

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Exit::Close(None),
                    Some(Command::Close { done }) => return Exit::Close(Some(done)),
                    Some(Command::Status { reply }) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Send { text, outbound }) => {
                        if let Err(reason) = self.write(transport, text, outbound).await {
                            return Exit::Dropped(reason);
                        }
                    }
                },

                frame = transport.recv() => {
                    keepalive_deadline = None;
                    match frame {
                        Ok(frame) => {
                            if let Err(reason) = self.on_frame(frame) {
                                return Exit::Dropped(reason);
                            }
                        }
                        Err(e) => return Exit::Dropped(e.to_string()),
                    }
                }

                Some(expiry) = self.expiry_rx.recv() => {
                    if self.correlation.expire(&expiry.id, expiry.seq) {
                        if let Some(ref m) = self.metrics {
                            m.record_timeout();
                        }
                        self.record_pending();
                    }
                }

                _ = ticker.tick(), if heartbeat.is_some() => {
                    if let Some(ref hb) = heartbeat {
                        if let Err(reason) = self.send_keepalive(transport, &hb.kind, hb.grace).await {
                            return Exit::Dropped(reason);
                        }
                        keepalive_deadline.get_or_insert_with(|| deadline_after(Instant::now(), hb.grace));
                    }
                }

                _ = tokio::time::sleep_until(deadline), if keepalive_deadline.is_some() => {
                    return Exit::Dropped("no inbound traffic within heartbeat grace".to_string());
                }
            }
        }
    }

    /// Write an outbound message; `Err` means the transport is gone
    async fn write(&mut self, transport: &mut Transport, text: String, outbound: Outbound) -> Result<(), String> {
        match outbound {
            Outbound::Fire { ack } => match transport.send(Frame::Text(text)).await {
                Ok(()) => {
                    let _ = ack.send(Ok(()));
                    Ok(())
                }
                Err(e) => {
                    let reason = e.to_string();
                    let _ = ack.send(Err(e));
                    Err(reason)
                }
            },
            Outbound::Correlated { id, timeout, reply } => {
                if self.correlation.register(id.clone(), reply, timeout).is_err() {
                    return Ok(());
                }
                self.record_pending();
                tracing::debug!(id = %id, "request sent");

                match transport.send(Frame::Text(text)).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        let reason = e.to_string();
                        self.correlation.fail(&id, e);
                        Err(reason)
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) -> Result<(), String> {
        match codec::decode_frame(frame) {
            // tungstenite queues the pong for a ping itself
            Ok(Inbound::Control(ControlFrame::Ping(_) | ControlFrame::Pong(_))) => Ok(()),
            Ok(Inbound::Control(ControlFrame::Close(close))) => Err(match close {
                Some(c) => format!("peer closed connection ({} {})", c.code, c.reason),
                None => "peer closed connection".to_string(),
            }),
            Ok(inbound) => {
                self.on_inbound(inbound);
                Ok(())
            }
            Err(e) => {
                self.on_decode_error(e);
                Ok(())
            }
        }
    }

    fn on_decode_error(&mut self, error: DecodeError) {
        if let Some(ref m) = self.metrics {
            m.record_error("decode");
        }
        match error {
            DecodeError::MalformedResponse { id, reason } => {
                tracing::warn!(id = %id, reason = %reason, "malformed response");
                if self.correlation.fail(&id, SendError::DecodeFailed(reason)) {
                    self.record_pending();
                }
            }
            other => tracing::warn!(error = %other, "skipping undecodable frame"),
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Response { id, outcome } => {
                let response = JsonRpcResponse::from_outcome(id.clone(), outcome);
                if self.correlation.resolve(&id, response) {
                    self.record_pending();
                }
            }
            Inbound::Notification(message) => {
                if let Some(ref m) = self.metrics {
                    let method = message.get("method").and_then(|v| v.as_str()).unwrap_or("");
                    m.record_notification(method);
                }
                let _ = self.events.send(Dispatch::Message(message));
            }
            Inbound::Batch(items) => {
                tracing::debug!(batch_size = items.len(), "batch received");
                for item in items {
                    match item {
                        Ok(inbound) => self.on_inbound(inbound),
                        Err(e) => self.on_decode_error(e),
                    }
                }
            }
            Inbound::Control(_) => {}
        }
    }

    async fn send_keepalive(
        &mut self,
        transport: &mut Transport,
        kind: &HeartbeatKind,
        grace: Duration,
    ) -> Result<(), String> {
        let frame = match kind {
            HeartbeatKind::Ping => Frame::Ping(Vec::new()),
            HeartbeatKind::Request { method, params } => {
                let id = Id::from(self.ids.fetch_add(1, Ordering::Relaxed));
                let request = JsonRpcRequest::new(method.clone(), params.clone(), id.clone());
                let text = match codec::encode(&request) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode heartbeat request");
                        return Ok(());
                    }
                };
                // nobody awaits the reply; registering keeps the response off the observer
                let (reply, _) = oneshot::channel();
                let _ = self.correlation.register(id, reply, grace);
                Frame::Text(text)
            }
        };

        tracing::trace!("heartbeat");
        transport.send(frame).await.map_err(|e| e.to_string())
    }

    async fn close_gracefully(&mut self, mut transport: Transport) {
        if let Err(e) = transport.send(Frame::Close(Some(CloseFrame::normal()))).await {
            tracing::debug!(error = %e, "close frame not sent");
            return;
        }

        let acknowledged = tokio::time::timeout(self.config.close_grace, async {
            loop {
                match transport.recv().await {
                    Ok(Frame::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;

        if acknowledged.is_err() {
            tracing::debug!(grace = ?self.config.close_grace, "peer did not acknowledge close");
        }
    }

    /// Decide the next step after a failure
    fn schedule_retry(&mut self, last: ConnectError) -> Result<Duration, ConnectError> {
        if self.retry_count >= self.config.retry_count {
            return Err(ConnectError::Exhausted {
                attempts: self.attempts,
                last: Box::new(last),
            });
        }
        let delay = self.backoff.delay(self.retry_count);
        self.retry_count += 1;
        Ok(delay)
    }

    /// Carry out a retry plan; `false` once the task should stop
    async fn follow(&mut self, plan: Result<Duration, ConnectError>) -> bool {
        match plan {
            Ok(delay) => {
                self.set_state(ConnectionState::Reconnecting);
                tracing::info!(attempt = self.retry_count, delay_ms = delay.as_millis() as u64, "reconnecting");
                if let Some(ref m) = self.metrics {
                    m.record_reconnection_attempt();
                }
                self.emit(LifecycleEvent::Reconnecting {
                    attempt: self.retry_count,
                    delay,
                });

                match self.wait(delay).await {
                    Waited::Elapsed => true,
                    Waited::Close(done) => {
                        self.finish(CloseReason::Requested, done);
                        false
                    }
                }
            }
            Err(exhausted) => {
                tracing::error!(error = %exhausted, "giving up on connection");
                self.emit(LifecycleEvent::ConnectionFailed {
                    category: FailureCategory::Exhausted,
                    error: exhausted.clone(),
                });
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(exhausted));
                }
                self.finish(CloseReason::Exhausted, None);
                false
            }
        }
    }

    async fn wait(&mut self, delay: Duration) -> Waited {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Waited::Elapsed,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Waited::Close(None),
                    Some(Command::Close { done }) => return Waited::Close(Some(done)),
                    Some(other) => self.answer_offline(other),
                },
            }
        }
    }

    /// Enter `Closed` and release everything
    fn finish(&mut self, reason: CloseReason, done: Option<oneshot::Sender<()>>) {
        self.correlation.fail_all(SendError::ConnectionClosed);
        self.record_pending();
        self.set_state(ConnectionState::Closed);
        tracing::info!(url = %self.url, reason = ?reason, "connection closed");
        self.emit(LifecycleEvent::Closed { reason });

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Answer a command while not connected
    fn answer_offline(&self, cmd: Command) {
        match cmd {
            Command::Send { outbound, .. } => match outbound {
                Outbound::Fire { ack } => {
                    let _ = ack.send(Err(SendError::NotConnected));
                }
                Outbound::Correlated { reply, .. } => {
                    let _ = reply.send(Err(SendError::NotConnected));
                }
            },
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Close { done } => {
                let _ = done.send(());
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: *self.state_tx.borrow(),
            retry_count: self.retry_count,
            next_delay: self.backoff.base_delay(self.retry_count),
            pending: self.correlation.snapshot(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "state transition");
            if let Some(ref m) = self.metrics {
                m.update_connection_state(state);
            }
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        tracing::debug!(event = event.name(), "lifecycle event");
        let _ = self.events.send(Dispatch::Event(event));
    }

    fn record_pending(&self) {
        if let Some(ref m) = self.metrics {
            m.update_pending(self.correlation.len());
        }
    }
}
