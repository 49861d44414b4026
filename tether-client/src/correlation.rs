//! Request/response correlation
//!
//! The [`CorrelationManager`] maps outstanding request ids to the callers
//! waiting for them. It is owned by the connection's owner task and never
//! shared, so every operation is a plain `&mut self` call and the order in
//! which the owner task processes events is the order in which requests are
//! settled.
//!
//! # Exactly-once delivery
//!
//! A pending entry leaves the map through exactly one of [`resolve`],
//! [`fail`], [`expire`] or [`fail_all`]. Removal happens before delivery, so
//! whichever path removes the entry first wins and every later attempt finds
//! nothing and returns `false`.
//!
//! Each registration gets a sequence number. A per-request timer task posts
//! an [`Expiry`] carrying that number back to the owner task; [`expire`]
//! ignores it unless the entry is still the same registration, so a late
//! timer can never cancel a newer request that reused the id.
//!
//! [`resolve`]: CorrelationManager::resolve
//! [`fail`]: CorrelationManager::fail
//! [`expire`]: CorrelationManager::expire
//! [`fail_all`]: CorrelationManager::fail_all

use crate::connection_state::PendingInfo;
use std::collections::HashMap;
use std::time::Duration;
use tether_core::{Id, JsonRpcResponse, SendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Roughly 30 years; stands in for "never" when a deadline would overflow
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + span`, saturating to a far-future instant instead of panicking
pub(crate) fn deadline_after(start: Instant, span: Duration) -> Instant {
    start
        .checked_add(span)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Where a correlated caller waits for its outcome
pub(crate) type ReplySlot = oneshot::Sender<Result<JsonRpcResponse, SendError>>;

/// Timer firing for one registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Expiry {
    pub id: Id,
    pub seq: u64,
}

struct PendingRequest {
    seq: u64,
    reply: ReplySlot,
    created: Instant,
    deadline: Instant,
    timer: JoinHandle<()>,
}

/// Pending-request table for one connection
pub(crate) struct CorrelationManager {
    pending: HashMap<Id, PendingRequest>,
    next_seq: u64,
    open: bool,
    expiry_tx: mpsc::UnboundedSender<Expiry>,
}

impl CorrelationManager {
    /// Create a manager whose timers report to `expiry_tx`
    ///
    /// Registration starts closed; the owner task reopens it on `Connected`.
    pub fn new(expiry_tx: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            pending: HashMap::new(),
            next_seq: 0,
            open: false,
            expiry_tx,
        }
    }

    /// Track a request and start its timer
    ///
    /// Rejections are delivered to `reply` as well as returned.
    pub fn register(&mut self, id: Id, reply: ReplySlot, timeout: Duration) -> Result<u64, SendError> {
        let rejection = if !self.open {
            Some(SendError::NotConnected)
        } else if self.pending.contains_key(&id) {
            Some(SendError::DuplicateId(id.clone()))
        } else {
            None
        };
        if let Some(err) = rejection {
            let _ = reply.send(Err(err.clone()));
            return Err(err);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let created = Instant::now();
        let deadline = deadline_after(created, timeout);
        let expiry_tx = self.expiry_tx.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = expiry_tx.send(Expiry { id: timer_id, seq });
        });

        self.pending.insert(
            id,
            PendingRequest {
                seq,
                reply,
                created,
                deadline,
                timer,
            },
        );
        Ok(seq)
    }

    /// Deliver a response; `false` if nothing was waiting for `id`
    pub fn resolve(&mut self, id: &Id, response: JsonRpcResponse) -> bool {
        match self.take(id) {
            Some(pending) => {
                let _ = pending.reply.send(Ok(response));
                true
            }
            None => {
                tracing::warn!(id = %id, "dropping response with no pending request");
                false
            }
        }
    }

    /// Fail one request with a specific error
    pub fn fail(&mut self, id: &Id, error: SendError) -> bool {
        match self.take(id) {
            Some(pending) => {
                let _ = pending.reply.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Time out a request if `seq` still identifies its registration
    pub fn expire(&mut self, id: &Id, seq: u64) -> bool {
        match self.pending.get(id) {
            Some(pending) if pending.seq == seq => {}
            _ => return false,
        }
        match self.pending.remove(id) {
            Some(pending) => {
                tracing::debug!(id = %id, "request timed out");
                let _ = pending.reply.send(Err(SendError::Timeout));
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request in registration order and close
    /// registration until [`reopen`](Self::reopen)
    pub fn fail_all(&mut self, error: SendError) -> usize {
        self.open = false;

        let mut drained: Vec<PendingRequest> = self.pending.drain().map(|(_, p)| p).collect();
        drained.sort_by_key(|p| p.seq);

        let count = drained.len();
        for pending in drained {
            pending.timer.abort();
            let _ = pending.reply.send(Err(error.clone()));
        }
        if count > 0 {
            tracing::debug!(count, error = %error, "failed outstanding requests");
        }
        count
    }

    /// Accept registrations again
    pub fn reopen(&mut self) {
        self.open = true;
    }

    /// Whether registrations are accepted
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outstanding requests in registration order
    pub fn snapshot(&self) -> Vec<PendingInfo> {
        let now = Instant::now();
        let mut entries: Vec<(&Id, &PendingRequest)> = self.pending.iter().collect();
        entries.sort_by_key(|(_, p)| p.seq);
        entries
            .into_iter()
            .map(|(id, p)| PendingInfo {
                id: id.clone(),
                age: now.saturating_duration_since(p.created),
                remaining: p.deadline.saturating_duration_since(now),
            })
            .collect()
    }

    fn take(&mut self, id: &Id) -> Option<PendingRequest> {
        let pending = self.pending.remove(id)?;
        pending.timer.abort();
        Some(pending)
    }
}

impl Drop for CorrelationManager {
    fn drop(&mut self) {
        for pending in self.pending.values() {
            pending.timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> (CorrelationManager, mpsc::UnboundedReceiver<Expiry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut manager = CorrelationManager::new(tx);
        manager.reopen();
        (manager, rx)
    }

    fn slot() -> (ReplySlot, oneshot::Receiver<Result<JsonRpcResponse, SendError>>) {
        oneshot::channel()
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let (mut manager, _expiry) = manager();
        let (tx, rx) = slot();

        manager.register(Id::Number(1), tx, Duration::from_secs(5)).unwrap();
        assert_eq!(manager.len(), 1);

        let response = JsonRpcResponse::success(json!(42), Id::Number(1));
        assert!(manager.resolve(&Id::Number(1), response.clone()));
        assert!(manager.is_empty());

        assert_eq!(rx.await.unwrap().unwrap(), response);
    }

    #[tokio::test]
    async fn test_second_resolution_is_noop() {
        let (mut manager, _expiry) = manager();
        let (tx, rx) = slot();
        manager.register(Id::Number(1), tx, Duration::from_secs(5)).unwrap();

        assert!(manager.resolve(&Id::Number(1), JsonRpcResponse::success(json!(1), Id::Number(1))));
        assert!(!manager.resolve(&Id::Number(1), JsonRpcResponse::success(json!(2), Id::Number(1))));
        assert!(!manager.fail(&Id::Number(1), SendError::ConnectionClosed));

        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (mut manager, _expiry) = manager();
        let (first, _first_rx) = slot();
        let (second, second_rx) = slot();

        manager.register(Id::Number(7), first, Duration::from_secs(5)).unwrap();
        let err = manager.register(Id::Number(7), second, Duration::from_secs(5)).unwrap_err();

        assert_eq!(err, SendError::DuplicateId(Id::Number(7)));
        assert_eq!(second_rx.await.unwrap().unwrap_err(), err);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_timer_posts_expiry() {
        let (mut manager, mut expiry) = manager();
        let (tx, rx) = slot();

        let seq = manager.register(Id::Number(3), tx, Duration::from_millis(10)).unwrap();
        let fired = expiry.recv().await.unwrap();
        assert_eq!(fired, Expiry { id: Id::Number(3), seq });

        assert!(manager.expire(&fired.id, fired.seq));
        assert_eq!(rx.await.unwrap().unwrap_err(), SendError::Timeout);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_stale_expiry_ignored() {
        let (mut manager, _expiry) = manager();
        let (first, _first_rx) = slot();
        let old_seq = manager.register(Id::Number(1), first, Duration::from_secs(5)).unwrap();
        manager.fail(&Id::Number(1), SendError::TransportClosed("reset".into()));

        let (second, mut second_rx) = slot();
        manager.register(Id::Number(1), second, Duration::from_secs(5)).unwrap();

        assert!(!manager.expire(&Id::Number(1), old_seq));
        assert_eq!(manager.len(), 1);
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resolve_beats_expiry() {
        let (mut manager, _expiry) = manager();
        let (tx, rx) = slot();
        let seq = manager.register(Id::Number(1), tx, Duration::from_secs(5)).unwrap();

        assert!(manager.resolve(&Id::Number(1), JsonRpcResponse::success(json!("ok"), Id::Number(1))));
        assert!(!manager.expire(&Id::Number(1), seq));
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_fail_all_fifo_and_closes_registration() {
        let (mut manager, _expiry) = manager();
        let (order_tx, mut order_rx) = mpsc::unbounded_channel();

        for n in [5i64, 1, 9] {
            let (tx, rx) = slot();
            manager.register(Id::Number(n), tx, Duration::from_secs(5)).unwrap();
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let outcome = rx.await.unwrap();
                let _ = order_tx.send((n, outcome));
            });
        }
        drop(order_tx);

        let snapshot: Vec<Id> = manager.snapshot().into_iter().map(|p| p.id).collect();
        assert_eq!(snapshot, vec![Id::Number(5), Id::Number(1), Id::Number(9)]);

        // let every waiter park on its slot so wake order follows send order
        tokio::task::yield_now().await;

        assert_eq!(manager.fail_all(SendError::ConnectionClosed), 3);
        assert!(manager.is_empty());
        assert!(!manager.is_open());

        let mut seen = Vec::new();
        while let Some((n, outcome)) = order_rx.recv().await {
            assert_eq!(outcome.unwrap_err(), SendError::ConnectionClosed);
            seen.push(n);
        }
        assert_eq!(seen, vec![5, 1, 9]);

        let (tx, _rx) = slot();
        assert_eq!(
            manager.register(Id::Number(2), tx, Duration::from_secs(5)).unwrap_err(),
            SendError::NotConnected
        );

        manager.reopen();
        let (tx, _rx) = slot();
        assert!(manager.register(Id::Number(2), tx, Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let (mut manager, _expiry) = manager();
        let (tx, mut rx) = slot();

        manager.register(Id::Number(1), tx, Duration::MAX).unwrap();
        let snapshot = manager.snapshot();
        assert!(snapshot[0].remaining > Duration::from_secs(86400 * 365));
        assert!(rx.try_recv().is_err());

        assert!(manager.resolve(&Id::Number(1), JsonRpcResponse::success(json!(1), Id::Number(1))));
        assert!(rx.await.unwrap().is_ok());
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(1)), now + Duration::from_secs(1));
        assert!(deadline_after(now, Duration::MAX) > now + Duration::from_secs(86400 * 365));
    }

    #[tokio::test]
    async fn test_snapshot_reports_remaining_time() {
        let (mut manager, _expiry) = manager();
        let (tx, _rx) = slot();
        manager.register(Id::from("auth"), tx, Duration::from_secs(30)).unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, Id::from("auth"));
        assert!(snapshot[0].remaining <= Duration::from_secs(30));
        assert!(snapshot[0].remaining > Duration::from_secs(29));
    }
}
