//! Transport layer for the request/response bridge
//!
//! This module provides the transport abstraction the dispatcher is written
//! against, plus the MQTT implementation used in production.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod mqtt;

/// Delivery guarantee requested for a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// Fire and forget (QoS 0)
    AtMostOnce,
    /// Retransmitted until acknowledged (QoS 1)
    #[default]
    AtLeastOnce,
}

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Receiver of every inbound message a transport sees.
///
/// Implementations are invoked on the transport's event loop and must not
/// block: hand the message off and return.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: InboundMessage);
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over different transport mechanisms
/// (primarily MQTT) to enable dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the transport broker/server
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the transport broker/server
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), Self::Error>;

    /// Subscribe to a topic; returns once the broker acknowledged it.
    /// Subscribing to an already subscribed topic is a no-op.
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Unsubscribe from a topic; unknown topics are a no-op
    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Register the single inbound message sink for the lifetime of the
    /// transport. A second registration is rejected.
    fn set_message_sink(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<crate::transport::mqtt::ConnectionState>;

    /// Check if the connection is permanently disconnected
    fn is_permanently_disconnected(&self) -> bool;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
