//! Response demultiplexer
//!
//! The one inbound-message sink registered on the transport. Every message is
//! routed by its exact topic string; payloads are passed through undecoded so
//! each waiter can decode into its own expected type.

use super::registry::CorrelationRegistry;
use crate::observability::metrics::metrics;
use crate::transport::{InboundMessage, MessageSink, Transport};
use std::sync::Arc;
use tracing::debug;

pub struct ResponseDemultiplexer {
    registry: Arc<CorrelationRegistry>,
}

impl ResponseDemultiplexer {
    pub fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }

    /// Create a demultiplexer and register it as the transport's sink.
    /// Fails if the transport already has a sink.
    pub fn attach<T: Transport>(
        transport: &T,
        registry: Arc<CorrelationRegistry>,
    ) -> Result<Arc<Self>, T::Error> {
        let demux = Arc::new(Self::new(registry));
        transport.set_message_sink(demux.clone())?;
        Ok(demux)
    }

    /// Route one message to its waiter. Returns whether a waiter matched.
    ///
    /// Response topics are registered in canonical form, so an inbound topic
    /// matches only if the broker delivered it on exactly that string.
    pub fn dispatch(&self, message: InboundMessage) -> bool {
        let InboundMessage { topic, payload } = message;
        if self.registry.resolve(&topic, payload) {
            return true;
        }

        metrics().reply_unmatched();
        debug!(topic = %topic, "No pending call for inbound message, dropping");
        false
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }
}

impl MessageSink for ResponseDemultiplexer {
    fn deliver(&self, message: InboundMessage) {
        self.dispatch(message);
    }
}
