//! Correlation table: routes decoded inbound messages to whoever is waiting
//! on their tag.
//!
//! Two maps share the tag space. `pending` holds one-shot waiters for
//! requests in flight; `subscriptions` holds persistent callbacks installed
//! after a successful subscribe. Untagged messages fan out to the
//! unsolicited observers. All map mutation happens under short
//! `parking_lot` critical sections; each pending entry is settled exactly
//! once, whichever of response arrival, timeout, clobber, or drain gets
//! there first.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::LeapError;
use crate::message::Response;

/// Persistent callback for subscription and unsolicited delivery.
pub(crate) type Handler = Arc<dyn Fn(Response) + Send + Sync>;

struct Pending {
    seq: u64,
    tx: oneshot::Sender<Result<Response, LeapError>>,
}

/// Receipt for a registered pending request.
///
/// `seq` distinguishes this registration from any later reuse of the same
/// tag, so the timeout path can never evict a successor's entry.
pub(crate) struct PendingTicket {
    pub(crate) seq: u64,
    pub(crate) rx: oneshot::Receiver<Result<Response, LeapError>>,
}

pub(crate) struct CorrelationTable {
    pending: Mutex<HashMap<String, Pending>>,
    subscriptions: Mutex<HashMap<String, Handler>>,
    unsolicited: Mutex<Vec<Handler>>,
    next_seq: AtomicU64,
    max_pending: usize,
}

impl CorrelationTable {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            unsolicited: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(1),
            max_pending,
        }
    }

    /// Register a one-shot waiter for `tag`.
    ///
    /// Reuse of an in-flight tag rejects the original waiter with a clobber
    /// error; the new registration always wins the slot.
    pub(crate) fn register(&self, tag: &str) -> Result<PendingTicket, LeapError> {
        let (tx, rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let clobbered = {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_pending && !pending.contains_key(tag) {
                tracing::warn!(
                    pending_len = pending.len(),
                    max_pending = self.max_pending,
                    "too many in-flight requests; refusing new request"
                );
                return Err(LeapError::TooManyInFlight {
                    limit: self.max_pending,
                });
            }
            pending.insert(tag.to_owned(), Pending { seq, tx })
        };

        if let Some(old) = clobbered {
            tracing::warn!(%tag, "tag reused while in flight; rejecting original request");
            let _ = old.tx.send(Err(LeapError::TagClobbered {
                tag: tag.to_owned(),
            }));
        }

        tracing::debug!(%tag, seq, "registered pending request");
        Ok(PendingTicket { seq, rx })
    }

    /// Remove a pending entry on the timeout/cancellation path.
    ///
    /// Only removes the entry if it is still the registration identified by
    /// `seq`; returns whether it was. A response that raced in first has
    /// already taken the entry and this becomes a no-op.
    pub(crate) fn revoke(&self, tag: &str, seq: u64) -> bool {
        let mut pending = self.pending.lock();
        if pending.get(tag).is_some_and(|p| p.seq == seq) {
            pending.remove(tag);
            true
        } else {
            false
        }
    }

    /// Install a persistent callback for a tag whose subscribe succeeded.
    pub(crate) fn promote_subscription(&self, tag: &str, handler: Handler) {
        tracing::debug!(%tag, "subscription installed");
        self.subscriptions.lock().insert(tag.to_owned(), handler);
    }

    pub(crate) fn add_unsolicited(&self, handler: Handler) {
        self.unsolicited.lock().push(handler);
    }

    pub(crate) fn clear_observers(&self) {
        self.unsolicited.lock().clear();
    }

    /// Route one decoded message.
    ///
    /// Tagged messages try the pending map first, then the subscriptions;
    /// a tag known to neither is logged and dropped. Untagged messages go
    /// to every unsolicited observer. Handler panics are contained here and
    /// never reach the reader loop.
    pub(crate) fn dispatch(&self, response: Response) {
        let Some(tag) = response.header.client_tag.clone() else {
            tracing::debug!("untagged message; notifying unsolicited observers");
            let observers: Vec<Handler> = self.unsolicited.lock().clone();
            for handler in &observers {
                invoke(handler, response.clone());
            }
            return;
        };

        let waiter = self.pending.lock().remove(&tag);
        if let Some(p) = waiter {
            tracing::debug!(%tag, seq = p.seq, "delivering response to pending request");
            let _ = p.tx.send(Ok(response));
            return;
        }

        let subscription = self.subscriptions.lock().get(&tag).cloned();
        if let Some(handler) = subscription {
            tracing::debug!(%tag, "routing message to subscription");
            invoke(&handler, response);
            return;
        }

        tracing::warn!(%tag, "message for unknown tag; dropping");
    }

    /// Reject every pending request and drop every subscription.
    ///
    /// Called once per disconnection by whichever side removed the
    /// connection; calling it again on an already-drained table is a no-op.
    pub(crate) fn drain(&self) {
        let drained: Vec<(String, Pending)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        let dropped_subscriptions = {
            let mut subscriptions = self.subscriptions.lock();
            let n = subscriptions.len();
            subscriptions.clear();
            n
        };
        if !drained.is_empty() || dropped_subscriptions > 0 {
            tracing::debug!(
                pending = drained.len(),
                subscriptions = dropped_subscriptions,
                "draining correlation state"
            );
        }
        for (tag, p) in drained {
            tracing::debug!(%tag, "rejecting in-flight request: connection lost");
            let _ = p.tx.send(Err(LeapError::Disconnected));
        }
    }

    /// Tags of requests still waiting for responses (for diagnostics).
    pub(crate) fn pending_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.pending.lock().keys().cloned().collect();
        tags.sort_unstable();
        tags
    }
}

fn invoke(handler: &Handler, response: Response) {
    if catch_unwind(AssertUnwindSafe(|| handler(response))).is_err() {
        tracing::warn!("message handler panicked; continuing dispatch");
    }
}
