//! Pending request store: the request/response correlation map.
//!
//! Maps `(cardhostId, requestId)` to the waiter that completes when the
//! matching `rpc-response` arrives. Completion is race-free: whichever of
//! response, timeout, cancellation, or cardhost-disconnect removes the
//! entry first is the one the waiter observes; everything else is dropped.

use crate::domain::error::RelayError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shared_types::Envelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Correlation key: the target cardhost plus the controller-chosen id.
pub type PendingKey = (String, String);

/// What a waiter observes: the response envelope, or the relay failure the
/// handler turns into a synthesized error envelope.
pub type RelayOutcome = Result<Envelope, RelayError>;

struct PendingEntry {
    sender: oneshot::Sender<RelayOutcome>,
    created_at: Instant,
    session_token: String,
}

/// Statistics for the pending request store.
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests completed with a response
    pub total_completed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled or failed in-band
    pub total_cancelled: AtomicU64,
}

/// Correlation store for in-flight relayed requests.
pub struct PendingRequestStore {
    pending: DashMap<PendingKey, PendingEntry>,
    timeout: Duration,
    stats: Arc<PendingStats>,
}

impl PendingRequestStore {
    /// Create a store; every entry shares the same relay deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// The shared relay deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a waiter for `(cardhost_id, request_id)`.
    ///
    /// Fails with `DuplicateRequestId` when that key is already pending.
    pub fn register(
        &self,
        cardhost_id: &str,
        request_id: &str,
        session_token: &str,
    ) -> Result<oneshot::Receiver<RelayOutcome>, RelayError> {
        let key = (cardhost_id.to_string(), request_id.to_string());
        match self.pending.entry(key) {
            Entry::Occupied(_) => Err(RelayError::DuplicateRequestId(request_id.to_string())),
            Entry::Vacant(vacant) => {
                let (tx, rx) = oneshot::channel();
                vacant.insert(PendingEntry {
                    sender: tx,
                    created_at: Instant::now(),
                    session_token: session_token.to_string(),
                });
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    cardhost_id = cardhost_id,
                    request_id = request_id,
                    "Registered pending request"
                );
                Ok(rx)
            }
        }
    }

    /// Complete a pending request with its response envelope.
    ///
    /// Returns false for unknown keys (late responses are dropped by the
    /// caller) and for waiters that already went away.
    pub fn complete(&self, cardhost_id: &str, request_id: &str, envelope: Envelope) -> bool {
        let key = (cardhost_id.to_string(), request_id.to_string());
        if let Some((_, entry)) = self.pending.remove(&key) {
            let elapsed = entry.created_at.elapsed();
            match entry.sender.send(Ok(envelope)) {
                Ok(()) => {
                    self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        cardhost_id = cardhost_id,
                        request_id = request_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Completed pending request"
                    );
                    true
                }
                Err(_) => {
                    self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        cardhost_id = cardhost_id,
                        request_id = request_id,
                        "Pending request waiter already gone"
                    );
                    false
                }
            }
        } else {
            debug!(
                cardhost_id = cardhost_id,
                request_id = request_id,
                "Dropping response for unknown or settled request id"
            );
            false
        }
    }

    /// Remove a pending entry without resolving its waiter. Used by the
    /// timeout path: if the entry is still present the waiter owns the
    /// timeout; if not, a response won the race.
    pub fn cancel(&self, cardhost_id: &str, request_id: &str) -> bool {
        let key = (cardhost_id.to_string(), request_id.to_string());
        if self.pending.remove(&key).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Record that a waiter's deadline fired.
    pub fn note_timeout(&self) {
        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Fail every pending request targeting `cardhost_id`.
    ///
    /// Returns the number of waiters resolved.
    pub fn fail_all_for_cardhost(&self, cardhost_id: &str, error: RelayError) -> usize {
        let keys: Vec<PendingKey> = self
            .pending
            .iter()
            .filter(|entry| entry.key().0 == cardhost_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for key in keys {
            if let Some((_, entry)) = self.pending.remove(&key) {
                let _ = entry.sender.send(Err(error.clone()));
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(
                cardhost_id = cardhost_id,
                failed = failed,
                error = %error,
                "Failed pending requests for departed cardhost"
            );
        }
        failed
    }

    /// Drain every pending request with `error`. Used on shutdown.
    pub fn drain_all(&self, error: RelayError) -> usize {
        let keys: Vec<PendingKey> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0;
        for key in keys {
            if let Some((_, entry)) = self.pending.remove(&key) {
                let _ = entry.sender.send(Err(error.clone()));
                drained += 1;
            }
        }
        drained
    }

    /// Sweep entries past the relay deadline, resolving their waiters with
    /// `Timeout`. The waiter-side deadline normally fires first; this
    /// covers waiters whose task died before observing it.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<PendingKey> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.value().created_at) > self.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            if let Some((_, entry)) = self.pending.remove(&key) {
                warn!(
                    cardhost_id = %key.0,
                    request_id = %key.1,
                    session_token = %entry.session_token,
                    "Removing expired pending request"
                );
                let _ = entry.sender.send(Err(RelayError::Timeout));
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                removed += 1;
            }
        }
        removed
    }

    /// Number of currently pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a key is pending.
    pub fn is_pending(&self, cardhost_id: &str, request_id: &str) -> bool {
        self.pending
            .contains_key(&(cardhost_id.to_string(), request_id.to_string()))
    }

    /// Statistics.
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
