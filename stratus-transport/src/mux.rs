//! Request/response correlation for concurrent RPC calls.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use stratus_core::{CorrelationId, ResultEnvelope, StratusError};

/// A pending call waiting for its reply.
struct PendingEntry {
    sender: oneshot::Sender<Result<ResultEnvelope, StratusError>>,
}

/// The receive half of one outstanding call.
///
/// Destroyed exactly once: by resolution, by deadline expiry, or by
/// cancellation, whichever fires first.
pub struct PendingCall {
    id: CorrelationId,
    receiver: oneshot::Receiver<Result<ResultEnvelope, StratusError>>,
}

impl PendingCall {
    /// The correlation id this call is registered under.
    #[must_use]
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }
}

/// Correlation table matching replies to outstanding calls.
///
/// Replies are matched solely by correlation id, so ordering between
/// distinct calls on a shared connection is irrelevant. One table is shared
/// by every connection; each inbound read loop resolves into it.
///
/// ## Example
///
/// ```rust
/// use stratus_transport::Multiplexer;
/// use stratus_core::{CorrelationId, ResultEnvelope};
///
/// let mux = Multiplexer::new();
///
/// let id = CorrelationId::generate();
/// let pending = mux.register(id.clone()).unwrap();
///
/// // Later, when the reply frame arrives:
/// mux.resolve(ResultEnvelope::ok(id, vec![1, 2, 3]));
///
/// // `pending` completes via `await_reply`.
/// # drop(pending);
/// ```
pub struct Multiplexer {
    pending: DashMap<CorrelationId, PendingEntry>,
}

impl Multiplexer {
    /// Create a new multiplexer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register a pending call under a caller-generated correlation id.
    ///
    /// Fails with `DuplicateCorrelationId` if the id is already registered;
    /// the original pending call is left untouched.
    pub fn register(&self, id: CorrelationId) -> Result<PendingCall, StratusError> {
        let (tx, rx) = oneshot::channel();

        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => Err(StratusError::DuplicateCorrelationId(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry { sender: tx });
                Ok(PendingCall { id, receiver: rx })
            }
        }
    }

    /// Resolve a pending call with its reply envelope.
    ///
    /// Wakes exactly one waiter: with the envelope itself, or with
    /// `RemoteInvocationFailed` when the exception field is set. Returns
    /// `false` if no pending call matches (late or unmatched delivery),
    /// which is a safe no-op.
    pub fn resolve(&self, envelope: ResultEnvelope) -> bool {
        match self.pending.remove(&envelope.correlation_id) {
            Some((_, entry)) => {
                let outcome = match &envelope.exception {
                    Some(message) => Err(StratusError::Remote {
                        message: message.clone(),
                        status: envelope.status_code(),
                    }),
                    None => Ok(envelope),
                };
                // Ignore send errors - receiver may have been dropped (timeout)
                let _ = entry.sender.send(outcome);
                true
            }
            None => {
                tracing::warn!(correlation_id = %envelope.correlation_id, "no pending call for reply");
                false
            }
        }
    }

    /// Cancel a pending call, waking its waiter with `CallCancelled`.
    pub fn cancel(&self, id: &CorrelationId) {
        if let Some((_, entry)) = self.pending.remove(id) {
            let _ = entry.sender.send(Err(StratusError::Cancelled));
        }
    }

    /// Remove a pending call without waking anyone.
    ///
    /// Used when the send itself failed: the caller already holds the send
    /// error and no reply can arrive.
    pub fn discard(&self, id: &CorrelationId) {
        self.pending.remove(id);
    }

    /// Fail every pending call (process shutdown sweep).
    pub fn fail_all(&self, error: StratusError) {
        // Collect keys first to avoid iterator invalidation
        let keys: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();

        for id in keys {
            if let Some((_, entry)) = self.pending.remove(&id) {
                let _ = entry.sender.send(Err(error.clone()));
            }
        }
    }

    /// Await the reply to a pending call.
    ///
    /// Suspends the calling task until the call is resolved, cancelled, or
    /// the timeout elapses. On timeout the entry is removed here; a
    /// resolution racing the expiry finds the entry gone and its value is
    /// dropped, so the caller observes exactly one terminal outcome.
    pub async fn await_reply(
        &self,
        call: PendingCall,
        timeout: Option<Duration>,
    ) -> Result<ResultEnvelope, StratusError> {
        let PendingCall { id, receiver } = call;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.remove(&id);
                    return Err(StratusError::Timeout(limit));
                }
            },
            None => receiver.await,
        };

        match received {
            Ok(outcome) => outcome,
            // Sender dropped without resolving
            Err(_) => {
                self.pending.remove(&id);
                Err(StratusError::Cancelled)
            }
        }
    }

    /// Get the number of pending calls.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}
