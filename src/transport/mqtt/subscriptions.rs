//! Subscription bookkeeping for the MQTT client
//!
//! rumqttc reports the packet id of a SUBSCRIBE only once the event loop
//! sends it, so acknowledgements are matched in two steps: requests queue up
//! in send order, move to the in-flight table on `Outgoing::Subscribe(pkid)`,
//! and resolve on the matching SubAck.

use super::connection::MqttError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Identifier of a queued acknowledgement, used to withdraw it if the
/// SUBSCRIBE never reached the event loop
pub type AckId = u64;

/// Receives the broker's verdict on one subscription
pub type AckReceiver = oneshot::Receiver<Result<(), MqttError>>;

struct PendingAck {
    id: AckId,
    topic: String,
    waiter: Option<oneshot::Sender<Result<(), MqttError>>>,
}

#[derive(Default)]
struct TrackerState {
    next_id: AckId,
    active: HashSet<String>,
    queued: VecDeque<PendingAck>,
    in_flight: HashMap<u16, PendingAck>,
}

impl TrackerState {
    fn enqueue(
        &mut self,
        topic: &str,
        waiter: Option<oneshot::Sender<Result<(), MqttError>>>,
    ) -> AckId {
        self.next_id += 1;
        let id = self.next_id;
        self.queued.push_back(PendingAck {
            id,
            topic: topic.to_string(),
            waiter,
        });
        id
    }
}

/// Result of matching a SubAck to its subscription
#[derive(Debug, PartialEq)]
pub enum AckOutcome {
    /// The packet id was never seen or was already failed
    Unknown,
    /// Broker accepted the filter
    Accepted { topic: String },
    /// Broker accepted the filter but the caller gave up waiting; the
    /// subscription should be withdrawn
    Orphaned { topic: String },
    /// Broker rejected the filter
    Rejected { topic: String, reason: String },
}

/// Active topic set plus pending SubAck waiters
#[derive(Default)]
pub struct SubscriptionTracker {
    state: Mutex<TrackerState>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self, topic: &str) -> bool {
        self.lock().active.contains(topic)
    }

    /// Topics to restore after a reconnect
    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().active.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    pub fn pending_count(&self) -> usize {
        let state = self.lock();
        state.queued.len() + state.in_flight.len()
    }

    /// Queue a SUBSCRIBE whose acknowledgement someone is waiting for.
    /// Must be called in the same order the requests reach the client.
    pub fn expect_ack(&self, topic: &str) -> (AckId, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let id = self.lock().enqueue(topic, Some(tx));
        (id, rx)
    }

    /// Queue a SUBSCRIBE nobody waits on (resubscription after reconnect)
    pub fn expect_silent_ack(&self, topic: &str) -> AckId {
        self.lock().enqueue(topic, None)
    }

    /// Withdraw a queued request whose SUBSCRIBE could not be handed to the
    /// client
    pub fn discard(&self, id: AckId) {
        self.lock().queued.retain(|pending| pending.id != id);
    }

    /// The event loop sent the oldest queued SUBSCRIBE with this packet id
    pub fn on_subscribe_sent(&self, packet_id: u16) {
        let mut state = self.lock();
        match state.queued.pop_front() {
            Some(pending) => {
                debug!(topic = %pending.topic, packet_id, "SUBSCRIBE sent");
                state.in_flight.insert(packet_id, pending);
            }
            None => warn!(packet_id, "SUBSCRIBE sent with no queued request"),
        }
    }

    /// Match a SubAck and wake its waiter
    pub fn on_suback(&self, packet_id: u16, failures: &[String]) -> AckOutcome {
        let mut state = self.lock();
        let Some(pending) = state.in_flight.remove(&packet_id) else {
            return AckOutcome::Unknown;
        };

        if !failures.is_empty() {
            let reason = failures.join(", ");
            state.active.remove(&pending.topic);
            if let Some(waiter) = pending.waiter {
                let _ = waiter.send(Err(MqttError::SubscriptionRejected {
                    topic: pending.topic.clone(),
                    reason: reason.clone(),
                }));
            }
            return AckOutcome::Rejected {
                topic: pending.topic,
                reason,
            };
        }

        match pending.waiter {
            Some(waiter) => {
                if waiter.send(Ok(())).is_err() {
                    return AckOutcome::Orphaned {
                        topic: pending.topic,
                    };
                }
                state.active.insert(pending.topic.clone());
            }
            None => {
                state.active.insert(pending.topic.clone());
            }
        }
        AckOutcome::Accepted {
            topic: pending.topic,
        }
    }

    /// Forget a topic; returns whether it was active
    pub fn remove(&self, topic: &str) -> bool {
        self.lock().active.remove(topic)
    }

    /// Fail every waiter; called when the connection drops and again when
    /// the session is replaced, since anything queued in between went to a
    /// client whose event loop is gone. Active topics are kept so they can be
    /// restored.
    pub fn fail_pending(&self, reason: &str) -> usize {
        let mut state = self.lock();
        let queued: Vec<PendingAck> = state.queued.drain(..).collect();
        let in_flight: Vec<PendingAck> = state.in_flight.drain().map(|(_, p)| p).collect();
        drop(state);

        let mut failed = 0;
        for pending in queued.into_iter().chain(in_flight) {
            if let Some(waiter) = pending.waiter {
                let _ = waiter.send(Err(MqttError::SubscriptionFailed(
                    format!("connection lost before SubAck for {}: {reason}", pending.topic)
                        .into(),
                )));
                failed += 1;
            }
        }
        failed
    }
}
