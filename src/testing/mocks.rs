//! Mock implementations for testing
//!
//! [`MockTransport`] is an in-memory broker stand-in: it records every
//! publish and subscription, and an optional scripted worker answers
//! requests by delivering replies back through the registered sink.

use crate::transport::mqtt::ConnectionState;
use crate::transport::{DeliveryGuarantee, InboundMessage, MessageSink, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// A publish recorded by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub guarantee: DeliveryGuarantee,
}

impl PublishedMessage {
    /// Payload parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Reply produced by a scripted worker
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub payload: Bytes,
    pub delay: Duration,
    /// Reply topic; defaults to the request's `responseTopic`
    pub topic: Option<String>,
}

impl ScriptedReply {
    pub fn json(value: Value) -> Self {
        Self {
            payload: Bytes::from(value.to_string()),
            delay: Duration::ZERO,
            topic: None,
        }
    }

    pub fn raw(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            delay: Duration::ZERO,
            topic: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn to_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// Worker script: sees the request topic and the decoded request envelope
pub type Responder = Arc<dyn Fn(&str, &Value) -> Option<ScriptedReply> + Send + Sync>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MockTransportError {
    #[error("mock transport is not connected")]
    NotConnected,
    #[error("publish rejected by mock")]
    PublishRejected,
    #[error("subscribe rejected by mock")]
    SubscribeRejected,
    #[error("a message sink is already registered")]
    SinkAlreadyRegistered,
}

#[derive(Default)]
struct MockState {
    subscriptions: HashSet<String>,
    subscribe_calls: Vec<String>,
    unsubscribe_calls: Vec<String>,
    published: Vec<PublishedMessage>,
}

/// Shared internals, so scripted replies can be delivered from spawned tasks
#[derive(Default)]
struct MockInner {
    connected: AtomicBool,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    stall_publish: AtomicBool,
    stall_subscribe: AtomicBool,
    sink: OnceCell<Arc<dyn MessageSink>>,
    responder: Mutex<Option<Responder>>,
    state: Mutex<MockState>,
}

impl MockInner {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver like a broker would: only to subscribed topics
    fn route(&self, topic: &str, payload: Bytes) -> bool {
        if !self.state().subscriptions.contains(topic) {
            return false;
        }
        match self.sink.get() {
            Some(sink) => {
                sink.deliver(InboundMessage::new(topic, payload));
                true
            }
            None => false,
        }
    }
}

/// In-memory transport for tests
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    /// A connected mock with no worker
    pub fn new() -> Self {
        let transport = Self::default();
        transport.set_connected(true);
        transport
    }

    /// A mock that starts disconnected
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// A connected mock whose worker answers with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<ScriptedReply> + Send + Sync + 'static,
    {
        let transport = Self::new();
        transport.set_responder(responder);
        transport
    }

    /// A connected mock whose worker echoes `{status: 200, data: <payload>}`
    pub fn echo() -> Self {
        Self::with_responder(|_, envelope| {
            Some(ScriptedReply::json(serde_json::json!({
                "status": 200,
                "data": envelope.get("payload").cloned().unwrap_or(Value::Null),
            })))
        })
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str, &Value) -> Option<ScriptedReply> + Send + Sync + 'static,
    {
        *self
            .inner
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(responder));
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.inner.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Publishes never complete, like a client whose request queue is stuck
    pub fn stall_publishes(&self, stall: bool) {
        self.inner.stall_publish.store(stall, Ordering::SeqCst);
    }

    /// Subscribes never complete, like a broker that withholds SubAck
    pub fn stall_subscribes(&self, stall: bool) {
        self.inner.stall_subscribe.store(stall, Ordering::SeqCst);
    }

    /// Push a message straight to the sink, bypassing subscriptions
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        match self.inner.sink.get() {
            Some(sink) => {
                sink.deliver(InboundMessage::new(topic, payload));
                true
            }
            None => false,
        }
    }

    /// Deliver to `topic` only if it is currently subscribed
    pub fn deliver_if_subscribed(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.inner.route(topic, payload.into())
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.state().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.inner
            .state()
            .published
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.state().subscriptions.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.inner.state().subscribe_calls.clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.inner.state().unsubscribe_calls.clone()
    }

    pub fn has_sink(&self) -> bool {
        self.inner.sink.get().is_some()
    }

    pub fn clear_history(&self) {
        let mut state = self.inner.state();
        state.published.clear();
        state.subscribe_calls.clear();
        state.unsubscribe_calls.clear();
    }

    fn run_responder(&self, topic: &str, payload: &[u8]) {
        let responder = self
            .inner
            .responder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(responder) = responder else {
            return;
        };
        let Ok(envelope) = serde_json::from_slice::<Value>(payload) else {
            return;
        };
        let Some(reply) = responder(topic, &envelope) else {
            return;
        };
        let Some(reply_topic) = reply.topic.clone().or_else(|| {
            envelope
                .get("responseTopic")
                .and_then(Value::as_str)
                .map(str::to_string)
        }) else {
            return;
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            inner.route(&reply_topic, reply.payload);
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.set_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.set_connected(false);
        self.inner.state().subscriptions.clear();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(MockTransportError::PublishRejected);
        }
        if self.inner.stall_publish.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.inner.state().published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            guarantee,
        });
        self.run_responder(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.inner.stall_subscribe.load(Ordering::SeqCst) {
            self.inner.state().subscribe_calls.push(topic.to_string());
            std::future::pending::<()>().await;
        }
        let mut state = self.inner.state();
        state.subscribe_calls.push(topic.to_string());
        if self.inner.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MockTransportError::SubscribeRejected);
        }
        state.subscriptions.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        let mut state = self.inner.state();
        if state.subscriptions.remove(topic) {
            state.unsubscribe_calls.push(topic.to_string());
        }
        Ok(())
    }

    fn set_message_sink(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error> {
        self.inner
            .sink
            .set(sink)
            .map_err(|_| MockTransportError::SinkAlreadyRegistered)
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("mock transport disconnected".to_string())
        })
    }

    fn is_permanently_disconnected(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct CollectingSink {
        messages: Mutex<Vec<InboundMessage>>,
    }

    impl MessageSink for CollectingSink {
        fn deliver(&self, message: InboundMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MockTransport::disconnected();
        let result = transport
            .publish("d/op/req", b"{}".to_vec(), DeliveryGuarantee::AtLeastOnce)
            .await;
        assert_eq!(result, Err(MockTransportError::NotConnected));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_are_a_set() {
        let transport = MockTransport::new();
        transport.subscribe("a").await.unwrap();
        transport.subscribe("a").await.unwrap();
        assert_eq!(transport.active_subscriptions(), vec!["a".to_string()]);

        transport.unsubscribe("a").await.unwrap();
        transport.unsubscribe("a").await.unwrap();
        assert!(transport.active_subscriptions().is_empty());
        assert_eq!(transport.unsubscribe_calls(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_worker_replies_to_response_topic() {
        let transport = MockTransport::echo();
        let sink = Arc::new(CollectingSink::default());
        transport.set_message_sink(sink.clone()).unwrap();
        transport.subscribe("d/op/res/1").await.unwrap();

        let request = json!({"responseTopic": "d/op/res/1", "payload": {"x": 1}});
        transport
            .publish(
                "d/op/req",
                request.to_string().into_bytes(),
                DeliveryGuarantee::AtLeastOnce,
            )
            .await
            .unwrap();

        for _ in 0..10 {
            if !sink.messages.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        let reply: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(reply, json!({"status": 200, "data": {"x": 1}}));
    }

    #[tokio::test]
    async fn test_replies_to_unsubscribed_topics_are_lost() {
        let transport = MockTransport::new();
        let sink = Arc::new(CollectingSink::default());
        transport.set_message_sink(sink.clone()).unwrap();

        assert!(!transport.deliver_if_subscribed("d/op/res/1", "{}"));
        assert!(transport.inject("d/op/res/1", "{}"));
        assert_eq!(sink.messages.lock().unwrap().len(), 1);
    }
}
