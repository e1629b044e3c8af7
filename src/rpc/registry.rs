//! Correlation registry
//!
//! Maps each in-flight call's response topic to the waiter that receives its
//! reply. All mutation happens under one mutex; the lock is never held while
//! delivering a reply or across an `.await`.

use crate::error::RpcError;
use crate::protocol::CorrelationId;
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// What a waiter receives: the raw reply payload, or why none will come
pub type ReplyOutcome = Result<Bytes, RpcError>;

/// Receiving half of a pending call's handoff
pub type ReplyReceiver = oneshot::Receiver<ReplyOutcome>;

/// A call waiting for its reply
struct PendingRequest {
    correlation_id: CorrelationId,
    operation: String,
    created_at: Instant,
    sender: oneshot::Sender<ReplyOutcome>,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, PendingRequest>,
    closed: bool,
}

#[derive(Debug, Default)]
struct RegistryCounters {
    registered: AtomicU64,
    resolved: AtomicU64,
    expired: AtomicU64,
    unmatched: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time registry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Calls currently waiting
    pub in_flight: usize,
    /// Total registrations
    pub registered: u64,
    /// Replies handed to a waiter
    pub resolved: u64,
    /// Entries removed by timeout or cancellation
    pub expired: u64,
    /// Inbound messages with no matching entry
    pub unmatched: u64,
    /// Replies matched after the waiter had gone away
    pub abandoned: u64,
}

/// Response topic to pending call map shared by the dispatcher and the
/// demultiplexer
#[derive(Default)]
pub struct CorrelationRegistry {
    state: Mutex<RegistryState>,
    counters: RegistryCounters,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `topic`.
    ///
    /// Fails with [`RpcError::DuplicateCorrelation`] if the topic is already
    /// registered, and with [`RpcError::Cancelled`] once the registry is closed.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        operation: &str,
        topic: &str,
    ) -> Result<ReplyReceiver, RpcError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.lock();
            if state.closed {
                return Err(RpcError::Cancelled("gateway is shutting down".to_string()));
            }
            if state.pending.contains_key(topic) {
                error!(
                    correlation_id = %correlation_id,
                    topic = %topic,
                    "Response topic already registered"
                );
                return Err(RpcError::DuplicateCorrelation {
                    topic: topic.to_string(),
                });
            }
            state.pending.insert(
                topic.to_string(),
                PendingRequest {
                    correlation_id,
                    operation: operation.to_string(),
                    created_at: Instant::now(),
                    sender,
                },
            );
        }

        self.counters.registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %correlation_id,
            operation = %operation,
            topic = %topic,
            "Registered pending request"
        );
        Ok(receiver)
    }

    /// Hand `payload` to the waiter registered for `topic`, removing the entry.
    ///
    /// Returns false when nothing is registered for the topic; the message is
    /// dropped and the registry is left untouched.
    pub fn resolve(&self, topic: &str, payload: Bytes) -> bool {
        let Some(pending) = self.lock().pending.remove(topic) else {
            self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        match pending.sender.send(Ok(payload)) {
            Ok(()) => {
                self.counters.resolved.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %pending.correlation_id,
                    operation = %pending.operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Resolved pending request"
                );
            }
            Err(_) => {
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %pending.correlation_id,
                    operation = %pending.operation,
                    "Reply arrived after the caller stopped waiting"
                );
            }
        }
        true
    }

    /// Remove the entry for `topic` without delivering anything.
    ///
    /// Returns whether this call removed it; false means a concurrent
    /// `resolve` (or an earlier `expire`) got there first.
    pub fn expire(&self, topic: &str) -> bool {
        let Some(pending) = self.lock().pending.remove(topic) else {
            return false;
        };

        self.counters.expired.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %pending.correlation_id,
            operation = %pending.operation,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "Expired pending request"
        );
        true
    }

    /// Fail every waiter with [`RpcError::Cancelled`] and refuse new
    /// registrations. Returns the number of calls cancelled.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().map(|(_, pending)| pending).collect()
        };

        let cancelled = drained.len();
        for pending in drained {
            self.counters.expired.fetch_add(1, Ordering::Relaxed);
            let _ = pending.sender.send(Err(RpcError::Cancelled(format!(
                "gateway shut down while {} was in flight",
                pending.operation
            ))));
        }
        if cancelled > 0 {
            warn!(cancelled, "Cancelled in-flight calls on shutdown");
        }
        cancelled
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_pending(&self, topic: &str) -> bool {
        self.lock().pending.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            in_flight: self.len(),
            registered: self.counters.registered.load(Ordering::Relaxed),
            resolved: self.counters.resolved.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(n: u128) -> CorrelationId {
        CorrelationId::from_u128(n)
    }

    #[tokio::test]
    async fn test_register_then_resolve_delivers_once() {
        let registry = CorrelationRegistry::new();
        let rx = registry.register(id(1), "get_appointment", "d/op/res/1").unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.is_pending("d/op/res/1"));

        assert!(registry.resolve("d/op/res/1", Bytes::from_static(b"{\"status\":200}")));
        assert!(!registry.resolve("d/op/res/1", Bytes::from_static(b"again")));

        let payload = rx.await.unwrap().unwrap();
        assert_eq!(&payload[..], b"{\"status\":200}");
        assert!(registry.is_empty());

        let stats = registry.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unmatched, 1);
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let registry = CorrelationRegistry::new();
        let _rx = registry.register(id(1), "op", "t").unwrap();
        let second = registry.register(id(2), "op", "t");
        assert!(matches!(second, Err(RpcError::DuplicateCorrelation { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unmatched_resolve_leaves_state_untouched() {
        let registry = CorrelationRegistry::new();
        let _rx = registry.register(id(1), "op", "mine").unwrap();
        assert!(!registry.resolve("someone-else", Bytes::new()));
        assert!(registry.is_pending("mine"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_expire_is_idempotent() {
        let registry = CorrelationRegistry::new();
        let _rx = registry.register(id(1), "op", "t").unwrap();
        assert!(registry.expire("t"));
        assert!(!registry.expire("t"));
        assert!(!registry.expire("never-registered"));
        assert_eq!(registry.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_late_reply_after_expire_is_dropped() {
        let registry = CorrelationRegistry::new();
        let rx = registry.register(id(1), "op", "t").unwrap();
        assert!(registry.expire("t"));

        assert!(!registry.resolve("t", Bytes::from_static(b"late")));
        // The sender went away with the entry
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_resolve_after_caller_dropped_counts_abandoned() {
        let registry = CorrelationRegistry::new();
        let rx = registry.register(id(1), "op", "t").unwrap();
        drop(rx);
        assert!(registry.resolve("t", Bytes::new()));
        assert_eq!(registry.stats().abandoned, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_cancels_waiters_and_rejects_new_calls() {
        let registry = CorrelationRegistry::new();
        let first = registry.register(id(1), "op", "a").unwrap();
        let second = registry.register(id(2), "op", "b").unwrap();

        assert_eq!(registry.close(), 2);
        assert!(registry.is_closed());
        assert!(matches!(first.await.unwrap(), Err(RpcError::Cancelled(_))));
        assert!(matches!(second.await.unwrap(), Err(RpcError::Cancelled(_))));
        assert!(matches!(
            registry.register(id(3), "op", "c"),
            Err(RpcError::Cancelled(_))
        ));
    }

    #[test]
    fn test_resolve_expire_race_has_one_winner() {
        for round in 0..200u128 {
            let registry = Arc::new(CorrelationRegistry::new());
            let topic = format!("d/op/res/{round}");
            let _rx = registry.register(id(round), "op", &topic).unwrap();

            let resolver = {
                let registry = registry.clone();
                let topic = topic.clone();
                std::thread::spawn(move || registry.resolve(&topic, Bytes::new()))
            };
            let expirer = {
                let registry = registry.clone();
                let topic = topic.clone();
                std::thread::spawn(move || registry.expire(&topic))
            };

            let resolved = resolver.join().unwrap();
            let expired = expirer.join().unwrap();
            assert!(resolved ^ expired, "exactly one winner per round");
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn test_many_concurrent_registrations() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handles: Vec<_> = (0..8u128)
            .map(|worker| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let mut receivers = Vec::new();
                    for n in 0..50u128 {
                        let topic = format!("d/op/res/{worker}-{n}");
                        receivers.push(registry.register(id(worker * 1000 + n), "op", &topic).unwrap());
                    }
                    receivers
                })
            })
            .collect();

        let receivers: usize = handles.into_iter().map(|h| h.join().unwrap().len()).sum();
        assert_eq!(receivers, 400);
        assert_eq!(registry.len(), 400);
        assert_eq!(registry.stats().in_flight, 400);
    }
}
