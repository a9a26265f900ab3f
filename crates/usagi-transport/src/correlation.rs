//! Correlation of outbound commands to their asynchronous replies.
//!
//! Every outbound command carries a caller-assigned `syncId`; the gateway
//! echoes it on the matching reply, interleaved with unrelated event pushes
//! on the same connection. The [`CorrelationTable`] issues ids, parks one
//! waiter per id, and routes replies back to them.
//!
//! Lifecycle of a slot: `Pending → Fulfilled` when the reply arrives, or
//! `Pending → Expired` when the waiter's deadline elapses. A reply for an
//! expired or unknown id is discarded with a warning; it is not fatal to the
//! connection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use usagi_core::{ApiError, ApiResult};

/// Process-wide table mapping correlation id to its pending reply slot.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    /// Pending slots: sync id → sender half of the reply channel.
    pending: Mutex<HashMap<i64, oneshot::Sender<Value>>>,
    /// Monotonically increasing id counter. Wraparound is not expected
    /// within a process lifetime.
    counter: AtomicI64,
}

impl CorrelationTable {
    /// Creates an empty table. Ids start at 1; the gateway reserves -1 for
    /// unsolicited pushes.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            counter: AtomicI64::new(1),
        }
    }

    /// Issues a fresh process-unique correlation id.
    pub fn next_id(&self) -> i64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a pending slot for `id` and returns its receiver.
    ///
    /// Register before sending so a reply that races the send is never
    /// missed.
    pub fn subscribe(&self, id: i64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        rx
    }

    /// Drops the pending slot for `id`, if any.
    pub fn forget(&self, id: i64) {
        self.pending.lock().unwrap().remove(&id);
    }

    /// Routes a reply frame to the waiter for `id`.
    ///
    /// Returns `true` if a waiter consumed the frame. Unknown or expired ids
    /// are a no-op: the reply is discarded with a warning.
    pub fn fulfil(&self, id: i64, frame: Value) -> bool {
        let waiter = self.pending.lock().unwrap().remove(&id);
        match waiter {
            Some(tx) => {
                // The receiver may have been dropped between expiry and
                // removal; that is equally a discard.
                tx.send(frame).is_ok()
            }
            None => {
                warn!(sync_id = id, "reply for unknown sync id discarded (timed out?)");
                false
            }
        }
    }

    /// Awaits the reply for `id` with a deadline.
    ///
    /// On timeout the slot is expired and removed, so a late reply becomes a
    /// no-op. On connection loss the sender is dropped and the caller
    /// observes [`ApiError::NotConnected`].
    pub async fn await_reply(
        &self,
        id: i64,
        rx: oneshot::Receiver<Value>,
        deadline: Duration,
    ) -> ApiResult<Value> {
        match timeout(deadline, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ApiError::NotConnected),
            Err(_) => {
                self.forget(id);
                Err(ApiError::Timeout)
            }
        }
    }

    /// Fails every pending slot by dropping its sender.
    ///
    /// Called on disconnect so waiters observe [`ApiError::NotConnected`]
    /// immediately instead of idling out their own deadlines.
    pub fn fail_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        if !pending.is_empty() {
            debug!(count = pending.len(), "failing pending correlations on disconnect");
            pending.clear();
        }
    }

    /// Number of slots currently pending.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_unique_and_monotone() {
        let table = CorrelationTable::new();
        let a = table.next_id();
        let b = table.next_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn concurrent_awaits_do_not_interfere() {
        let table = std::sync::Arc::new(CorrelationTable::new());
        let (a, b) = (table.next_id(), table.next_id());
        let rx_a = table.subscribe(a);
        let rx_b = table.subscribe(b);

        // Fulfil in reverse registration order.
        assert!(table.fulfil(b, json!({ "n": "b" })));
        assert!(table.fulfil(a, json!({ "n": "a" })));

        let got_a = table.await_reply(a, rx_a, Duration::from_secs(1)).await.unwrap();
        let got_b = table.await_reply(b, rx_b, Duration::from_secs(1)).await.unwrap();
        assert_eq!(got_a["n"], "a");
        assert_eq!(got_b["n"], "b");
    }

    #[tokio::test]
    async fn timeout_expires_slot_and_late_reply_is_noop() {
        let table = CorrelationTable::new();
        let id = table.next_id();
        let rx = table.subscribe(id);

        let result = table.await_reply(id, rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ApiError::Timeout)));
        assert_eq!(table.pending_count(), 0);

        // Late reply: discarded, no error, no stale fulfilment.
        assert!(!table.fulfil(id, json!({})));
    }

    #[tokio::test]
    async fn fail_all_unblocks_waiters_with_not_connected() {
        let table = CorrelationTable::new();
        let id = table.next_id();
        let rx = table.subscribe(id);
        table.fail_all();
        let result = table.await_reply(id, rx, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ApiError::NotConnected)));
    }

    #[test]
    fn fulfilling_twice_is_noop() {
        let table = CorrelationTable::new();
        let id = table.next_id();
        let _rx = table.subscribe(id);
        assert!(table.fulfil(id, json!({ "first": true })));
        assert!(!table.fulfil(id, json!({ "second": true })));
    }
}
