//! Connection lifecycle states and events
//!
//! ```text
//! Disconnected → Connecting → Connected
//!                  ↑    ↓         ↓
//!               Reconnecting ←────┘
//!                    ↓
//!                 Closed (terminal, also reachable from any state via close())
//! ```
//!
//! Every transition is made by the connection's owner task. Handles read the
//! latest state through a `watch` channel; observers receive
//! [`LifecycleEvent`]s in the order the transitions happened.

use std::time::Duration;
use tether_core::{ConnectError, FailureCategory, Id};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, not yet dialing
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Handshake complete; sends are accepted
    Connected,
    /// Waiting out a backoff delay before the next dial
    Reconnecting,
    /// Terminal: closed by the caller or retries exhausted
    Closed,
}

impl ConnectionState {
    /// Lower-case label for logs and metric attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called, or every handle was dropped
    Requested,
    /// Retry budget consumed
    Exhausted,
}

/// Lifecycle notification delivered to observers
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Handshake complete. `reconnected` is true for every connection after
    /// the first, the cue for adapters to re-subscribe.
    Connected {
        /// Whether this follows a previous successful connection
        reconnected: bool,
    },
    /// A retry has been scheduled
    Reconnecting {
        /// 1-based retry number since the last successful connection
        attempt: u32,
        /// Backoff delay before the dial
        delay: Duration,
    },
    /// A dial failed, or the retry budget ran out (`category == Exhausted`)
    ConnectionFailed {
        /// Coarse classification
        category: FailureCategory,
        /// Underlying error
        error: ConnectError,
    },
    /// Terminal state reached
    Closed {
        /// Cause
        reason: CloseReason,
    },
}

impl LifecycleEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Connected { .. } => "connected",
            LifecycleEvent::Reconnecting { .. } => "reconnecting",
            LifecycleEvent::ConnectionFailed { .. } => "connection_failed",
            LifecycleEvent::Closed { .. } => "closed",
        }
    }
}

/// One outstanding request as seen by [`ConnectionStatus`]
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInfo {
    /// Correlation id
    pub id: Id,
    /// Time since registration
    pub age: Duration,
    /// Time left before the request times out
    pub remaining: Duration,
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    /// Current state
    pub state: ConnectionState,
    /// Retries scheduled since the last successful connection
    pub retry_count: u32,
    /// Delay the next retry would use
    pub next_delay: Duration,
    /// Outstanding requests in registration order
    pub pending: Vec<PendingInfo>,
}
