//! Pure message routing logic for MQTT events
//!
//! This module contains pure functions for classifying MQTT events and the
//! forwarder that hands inbound publishes to the single registered sink.

use crate::transport::{InboundMessage, MessageSink};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Determine if an inbound publish should reach the sink (pure function)
    ///
    /// Retained messages are skipped: a retained reply left on a topic by a
    /// misbehaving worker must never resolve a fresh call.
    pub fn should_process_message(topic: &str, retain: bool) -> bool {
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }
        true
    }

    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failures: Self::subscription_failures(&suback.return_codes),
                },
                Packet::UnsubAck(unsuback) => EventRoute::UnsubscriptionConfirmed {
                    packet_id: unsuback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(packet_id)) => EventRoute::SubscribeSent {
                packet_id: *packet_id,
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Collect the failing reason codes of a SubAck (pure function)
    pub fn subscription_failures(codes: &[SubscribeReasonCode]) -> Vec<String> {
        codes
            .iter()
            .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .map(|code| format!("{code:?}"))
            .collect()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// A SUBSCRIBE packet left with this packet id
    SubscribeSent { packet_id: u16 },
    /// Subscription acknowledged; `failures` lists rejected filters
    SubscriptionConfirmed {
        packet_id: u16,
        failures: Vec<String>,
    },
    /// Unsubscription acknowledged
    UnsubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Hands inbound messages to the one sink registered for the transport's
/// lifetime.
#[derive(Default)]
pub struct InboundForwarder {
    sink: OnceCell<Arc<dyn MessageSink>>,
}

impl InboundForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the sink. Returns false if one is already registered.
    pub fn set_sink(&self, sink: Arc<dyn MessageSink>) -> bool {
        self.sink.set(sink).is_ok()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.get().is_some()
    }

    /// Forward a message; returns false when no sink is registered
    pub fn forward(&self, message: InboundMessage) -> bool {
        match self.sink.get() {
            Some(sink) => {
                sink.deliver(message);
                true
            }
            None => {
                warn!(
                    topic = %message.topic,
                    "Received MQTT message but no sink registered - message dropped"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, Publish, SubAck,
    };
    use rumqttc::v5::mqttbytes::QoS;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<InboundMessage>>,
    }

    impl MessageSink for RecordingSink {
        fn deliver(&self, message: InboundMessage) {
            self.received.lock().unwrap().push(message);
        }
    }

    #[test]
    fn test_should_process_message() {
        assert!(MessageHandler::should_process_message("d/op/res/1", false));
        assert!(!MessageHandler::should_process_message("d/op/res/1", true));
    }

    #[test]
    fn test_route_connection_events() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("d/op/res/1"),
            pkid: 1,
            payload: Bytes::from(r#"{"status":200}"#),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "d/op/res/1");
                assert_eq!(&payload[..], br#"{"status":200}"#);
                assert!(!retain);
            }
            other => panic!("Expected MessageReceived route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_subscribe_lifecycle() {
        let sent = Event::Outgoing(Outgoing::Subscribe(7));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&sent),
            EventRoute::SubscribeSent { packet_id: 7 }
        ));

        let suback = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
            properties: None,
        }));
        match MessageHandler::route_mqtt_event(&suback) {
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                assert_eq!(packet_id, 7);
                assert!(failures.is_empty());
            }
            other => panic!("Expected SubscriptionConfirmed route, got {other:?}"),
        }

        let other_outgoing = Event::Outgoing(Outgoing::PingReq);
        assert!(matches!(
            MessageHandler::route_mqtt_event(&other_outgoing),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_subscription_failures() {
        let codes = vec![
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::NotAuthorized,
        ];
        let failures = MessageHandler::subscription_failures(&codes);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("NotAuthorized"));
    }

    #[test]
    fn test_forwarder_accepts_one_sink() {
        let forwarder = InboundForwarder::new();
        assert!(!forwarder.forward(InboundMessage::new("a", "b")));

        let sink = Arc::new(RecordingSink::default());
        assert!(forwarder.set_sink(sink.clone()));
        assert!(!forwarder.set_sink(Arc::new(RecordingSink::default())));
        assert!(forwarder.has_sink());

        assert!(forwarder.forward(InboundMessage::new("d/op/res/1", "{}")));
        let received = sink.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].topic, "d/op/res/1");
    }
}
