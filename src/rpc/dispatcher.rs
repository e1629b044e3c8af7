//! Request dispatcher
//!
//! Entry point for callers. A call registers its waiter, subscribes to its
//! private response topic, publishes the request and then waits, strictly in
//! that order. Whatever way a call ends (reply, timeout, error, or the
//! caller dropping the future) its registry entry and subscription are
//! released.

use super::registry::{CorrelationRegistry, ReplyOutcome, ReplyReceiver};
use crate::config::GatewayConfig;
use crate::error::{RpcError, RpcResult};
use crate::observability::metrics::metrics;
use crate::protocol::{
    validate_topic_level, CorrelationId, ReplyEnvelope, RequestEnvelope, TopicBuilder,
};
use crate::transport::mqtt::ConnectionState;
use crate::transport::{DeliveryGuarantee, Transport};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::RecvError;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn, Instrument};

/// Timeout used when no configuration is supplied
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-dispatcher call settings
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    /// First topic level of request and response topics
    pub domain: String,
    pub default_timeout: Duration,
    /// Delivery guarantee for request publishes
    pub guarantee: DeliveryGuarantee,
}

impl DispatcherSettings {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            default_timeout: DEFAULT_CALL_TIMEOUT,
            guarantee: DeliveryGuarantee::AtLeastOnce,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            domain: config.gateway.domain.clone(),
            default_timeout: config.rpc.default_timeout(),
            guarantee: config.mqtt.qos,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Issues request/response calls over a shared transport
pub struct RequestDispatcher<T> {
    transport: Arc<T>,
    registry: Arc<CorrelationRegistry>,
    settings: DispatcherSettings,
}

impl<T> Clone for RequestDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T: Transport + 'static> RequestDispatcher<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<CorrelationRegistry>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Call `operation` and decode the worker's reply as `Resp`.
    ///
    /// The reply is returned as the worker sent it, status included; a
    /// non-2xx status is not an error at this layer.
    pub async fn call<Req, Resp>(
        &self,
        operation: &str,
        request: &Req,
        timeout: Duration,
    ) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = self.call_raw(operation, request, timeout).await?;
        serde_json::from_slice(&payload)
            .map_err(|e| RpcError::malformed_reply(operation, e.to_string(), &payload))
    }

    /// [`call`](Self::call) with the configured default timeout
    pub async fn call_with_default_timeout<Req, Resp>(
        &self,
        operation: &str,
        request: &Req,
    ) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.call(operation, request, self.settings.default_timeout)
            .await
    }

    /// Call `operation` and normalize the reply to `{status, data, message}`,
    /// decoding `data` as `Data`
    pub async fn call_enveloped<Req, Data>(
        &self,
        operation: &str,
        request: &Req,
        timeout: Duration,
    ) -> RpcResult<ReplyEnvelope<Data>>
    where
        Req: Serialize + ?Sized,
        Data: DeserializeOwned,
    {
        let payload = self.call_raw(operation, request, timeout).await?;
        let reply: Value = serde_json::from_slice(&payload)
            .map_err(|e| RpcError::malformed_reply(operation, e.to_string(), &payload))?;

        ReplyEnvelope::<Value>::normalize(reply)
            .and_then(|envelope| envelope.into_typed())
            .map_err(|e| RpcError::malformed_reply(operation, e.to_string(), &payload))
    }

    /// Call `operation` and return the undecoded reply payload
    pub async fn call_raw<Req>(
        &self,
        operation: &str,
        request: &Req,
        timeout: Duration,
    ) -> RpcResult<Bytes>
    where
        Req: Serialize + ?Sized,
    {
        validate_topic_level(operation).map_err(|reason| RpcError::InvalidOperation {
            operation: operation.to_string(),
            reason,
        })?;

        let correlation_id = CorrelationId::new();
        let span = crate::rpc_span!(
            correlation_id = %correlation_id,
            operation = %operation,
            timeout_ms = timeout.as_millis() as u64
        );

        // Dropping the call future drops the record, which counts it abandoned
        let record = metrics().begin_call(operation);
        let result = self
            .execute(correlation_id, operation, request, timeout)
            .instrument(span.clone())
            .await;

        let _entered = span.enter();
        match &result {
            Ok(payload) => {
                info!(
                    elapsed_ms = record.elapsed().as_millis() as u64,
                    reply_bytes = payload.len(),
                    "Call completed"
                );
                record.succeeded();
            }
            Err(error) if error.is_timeout() => record.timed_out(),
            Err(error) => {
                warn!(error = %error, kind = error.kind(), "Call failed");
                record.failed();
            }
        }
        result
    }

    async fn execute<Req>(
        &self,
        correlation_id: CorrelationId,
        operation: &str,
        request: &Req,
        timeout: Duration,
    ) -> RpcResult<Bytes>
    where
        Req: Serialize + ?Sized,
    {
        // One budget covers subscribe, publish and the wait for the reply
        let deadline = Instant::now() + timeout;
        if !self.transport.is_connected() {
            return Err(RpcError::transport_unavailable(describe_state(
                self.transport.connection_state(),
            )));
        }

        let domain = &self.settings.domain;
        let response_topic = TopicBuilder::response_topic(domain, operation, &correlation_id);
        let request_topic = TopicBuilder::request_topic(domain, operation);
        let body = serde_json::to_vec(&RequestEnvelope::new(
            correlation_id,
            response_topic.clone(),
            request,
        ))?;

        let receiver = self
            .registry
            .register(correlation_id, operation, &response_topic)?;
        let mut guard = CallGuard::new(
            self.registry.clone(),
            self.transport.clone(),
            response_topic.clone(),
        );

        match timeout_at(deadline, self.transport.subscribe(&response_topic)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                guard.release().await;
                return Err(RpcError::subscribe(response_topic, e));
            }
            Err(_) => {
                guard.release().await;
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Subscribe outlasted the call timeout"
                );
                return Err(RpcError::timeout(operation, timeout));
            }
        }

        let publish = self
            .transport
            .publish(&request_topic, body, self.settings.guarantee);
        match timeout_at(deadline, publish).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                guard.release().await;
                return Err(RpcError::publish(operation, e));
            }
            Err(_) => {
                guard.release().await;
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Publish outlasted the call timeout"
                );
                return Err(RpcError::timeout(operation, timeout));
            }
        }
        debug!(
            request_topic = %request_topic,
            response_topic = %response_topic,
            "Request published, awaiting reply"
        );

        let outcome = self
            .await_reply(receiver, &response_topic, operation, deadline, timeout)
            .await;
        guard.release().await;
        outcome
    }

    async fn await_reply(
        &self,
        mut receiver: ReplyReceiver,
        response_topic: &str,
        operation: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> RpcResult<Bytes> {
        match timeout_at(deadline, &mut receiver).await {
            Ok(delivered) => unpack(delivered),
            Err(_) => {
                if self.registry.expire(response_topic) {
                    warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "No reply before timeout"
                    );
                    return Err(RpcError::timeout(operation, timeout));
                }
                // A reply claimed the entry just before expiry; it is on its way
                debug!("Reply raced the timeout");
                unpack(receiver.await)
            }
        }
    }
}

fn unpack(delivered: Result<ReplyOutcome, RecvError>) -> RpcResult<Bytes> {
    delivered.unwrap_or_else(|_| Err(RpcError::Cancelled("reply handoff closed".to_string())))
}

fn describe_state(state: Option<ConnectionState>) -> String {
    match state {
        None => "never connected".to_string(),
        Some(ConnectionState::Disconnected(reason)) => format!("disconnected: {reason}"),
        Some(ConnectionState::PermanentlyDisconnected(reason)) => {
            format!("permanently disconnected: {reason}")
        }
        Some(ConnectionState::Reconnecting(attempt)) => format!("reconnecting (attempt {attempt})"),
        Some(ConnectionState::Connecting) => "connecting".to_string(),
        Some(ConnectionState::Connected) => "connected".to_string(),
    }
}

/// Releases a call's registry entry and subscription. If the call future is
/// dropped before `release`, cleanup happens on drop.
struct CallGuard<T: Transport + 'static> {
    registry: Arc<CorrelationRegistry>,
    transport: Arc<T>,
    topic: String,
    armed: bool,
}

impl<T: Transport + 'static> CallGuard<T> {
    fn new(registry: Arc<CorrelationRegistry>, transport: Arc<T>, topic: String) -> Self {
        Self {
            registry,
            transport,
            topic,
            armed: true,
        }
    }

    async fn release(&mut self) {
        if !self.armed {
            return;
        }
        self.registry.expire(&self.topic);
        if let Err(e) = self.transport.unsubscribe(&self.topic).await {
            warn!(topic = %self.topic, error = %e, "Failed to unsubscribe response topic");
        }
        self.armed = false;
    }
}

impl<T: Transport + 'static> Drop for CallGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.registry.expire(&self.topic) {
            debug!(topic = %self.topic, "Call abandoned by caller");
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let transport = self.transport.clone();
            let topic = std::mem::take(&mut self.topic);
            handle.spawn(async move {
                if let Err(e) = transport.unsubscribe(&topic).await {
                    warn!(topic = %topic, error = %e, "Failed to unsubscribe abandoned call");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Operation;
    use crate::rpc::ResponseDemultiplexer;
    use crate::testing::mocks::{MockTransport, ScriptedReply};
    use serde_json::json;

    const DOMAIN: &str = "dentistimo";

    fn dispatcher(transport: MockTransport) -> RequestDispatcher<MockTransport> {
        let registry = Arc::new(CorrelationRegistry::new());
        ResponseDemultiplexer::attach(&transport, registry.clone()).unwrap();
        RequestDispatcher::new(
            Arc::new(transport),
            registry,
            DispatcherSettings::new(DOMAIN),
        )
    }

    fn response_topic_of(message: &crate::testing::mocks::PublishedMessage) -> String {
        message.json().unwrap()["responseTopic"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_returned_unmodified() {
        let transport = MockTransport::with_responder(|_, _| {
            Some(
                ScriptedReply::json(json!({"status": 201, "appointmentId": "A1"}))
                    .after(Duration::from_millis(100)),
            )
        });
        let dispatcher = dispatcher(transport.clone());

        let reply: Value = dispatcher
            .call(
                Operation::MAKE_APPOINTMENT,
                &json!({"patientId": "P1", "slot": "T1"}),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert_eq!(reply, json!({"status": 201, "appointmentId": "A1"}));
        assert!(dispatcher.registry().is_empty());
        assert!(transport.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_request_envelope_on_the_wire() {
        let transport = MockTransport::echo();
        let dispatcher = dispatcher(transport.clone());

        let _: Value = dispatcher
            .call(
                Operation::GET_APPOINTMENT,
                &json!({"appointmentId": "A1"}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let published = transport.published_to("dentistimo/get_appointment/req");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].guarantee, DeliveryGuarantee::AtLeastOnce);

        let envelope = published[0].json().unwrap();
        let correlation_id = envelope["correlationId"].as_str().unwrap();
        assert_eq!(
            envelope["responseTopic"],
            format!("dentistimo/get_appointment/res/{correlation_id}")
        );
        assert_eq!(envelope["payload"], json!({"appointmentId": "A1"}));
        assert!(envelope["sentAt"].is_string());
    }

    #[tokio::test]
    async fn test_subscribe_happens_before_publish() {
        let transport = MockTransport::new();
        let observed = transport.clone();
        transport.set_responder(move |_, envelope| {
            let topic = envelope["responseTopic"].as_str().unwrap_or_default();
            // The response topic must already be subscribed when the request goes out
            let subscribed = observed.active_subscriptions().iter().any(|t| t == topic);
            Some(ScriptedReply::json(json!({"status": 200, "subscribed": subscribed})))
        });
        let dispatcher = dispatcher(transport);

        let reply: Value = dispatcher
            .call("list_appointments", &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply["subscribed"], true);
    }

    #[tokio::test]
    async fn test_disconnected_transport_fails_fast() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher(transport.clone());
        transport.set_connected(false);

        let result: RpcResult<Value> = dispatcher
            .call(
                Operation::MAKE_APPOINTMENT,
                &json!({"patientId": "P1", "slot": "T1"}),
                Duration::from_secs(2),
            )
            .await;

        assert!(matches!(result, Err(RpcError::TransportUnavailable { .. })));
        assert!(transport.published().is_empty());
        assert!(transport.subscribe_calls().is_empty());
        assert_eq!(dispatcher.registry().stats().registered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cleans_up() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher(transport.clone());

        let started = tokio::time::Instant::now();
        let result: RpcResult<Value> = dispatcher
            .call(
                Operation::MAKE_APPOINTMENT,
                &json!({"patientId": "P1"}),
                Duration::from_millis(500),
            )
            .await;

        assert!(matches!(
            result,
            Err(RpcError::RequestTimeout { ref operation, timeout })
                if operation == "make_appointment" && timeout == Duration::from_millis(500)
        ));
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(dispatcher.registry().is_empty());
        assert!(transport.active_subscriptions().is_empty());
        assert_eq!(transport.unsubscribe_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_dropped() {
        let transport = MockTransport::with_responder(|_, _| {
            Some(ScriptedReply::json(json!({"status": 200})).after(Duration::from_millis(800)))
        });
        let dispatcher = dispatcher(transport.clone());

        let result: RpcResult<Value> = dispatcher
            .call("get_appointment", &json!({}), Duration::from_millis(500))
            .await;
        assert!(result.unwrap_err().is_timeout());

        // The scripted reply fires into an unsubscribed topic
        tokio::time::sleep(Duration::from_millis(500)).await;

        // Even if the broker still delivered it, nothing is waiting
        let topic = response_topic_of(&transport.published()[0]);
        assert!(transport.inject(&topic, r#"{"status":200}"#));
        assert!(dispatcher.registry().is_empty());
        assert_eq!(dispatcher.registry().stats().unmatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_get_their_own_replies() {
        // First call gets the slower reply so replies arrive out of order
        let transport = MockTransport::with_responder(|_, envelope| {
            let slot = envelope["payload"]["slot"].as_str().unwrap_or_default().to_string();
            let delay = if slot == "T1" { 300 } else { 50 };
            Some(
                ScriptedReply::json(json!({"status": 201, "slot": slot}))
                    .after(Duration::from_millis(delay)),
            )
        });
        let dispatcher = dispatcher(transport);

        let (slow, fast) = (json!({"slot": "T1"}), json!({"slot": "T2"}));
        let first =
            dispatcher.call::<_, Value>(Operation::MAKE_APPOINTMENT, &slow, Duration::from_secs(2));
        let second =
            dispatcher.call::<_, Value>(Operation::MAKE_APPOINTMENT, &fast, Duration::from_secs(2));
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap()["slot"], "T1");
        assert_eq!(second.unwrap()["slot"], "T2");
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_no_cross_talk_under_load() {
        let transport = MockTransport::echo();
        let dispatcher = dispatcher(transport.clone());

        let calls = (0..100).map(|n| {
            let dispatcher = dispatcher.clone();
            async move {
                let reply: Value = dispatcher
                    .call("get_appointment", &json!({"n": n}), Duration::from_secs(5))
                    .await
                    .unwrap();
                (n, reply)
            }
        });

        for (n, reply) in futures::future::join_all(calls).await {
            assert_eq!(reply["data"]["n"], n);
        }
        assert!(dispatcher.registry().is_empty());
        assert!(transport.active_subscriptions().is_empty());
        assert_eq!(dispatcher.registry().stats().resolved, 100);
    }

    #[tokio::test]
    async fn test_publish_failure_unwinds_registration() {
        let transport = MockTransport::new();
        transport.fail_publishes(true);
        let dispatcher = dispatcher(transport.clone());

        let result: RpcResult<Value> = dispatcher
            .call("cancel_appointment", &json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(RpcError::Publish { .. })));
        assert!(dispatcher.registry().is_empty());
        assert!(transport.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_failure_skips_publish() {
        let transport = MockTransport::new();
        transport.fail_subscribes(true);
        let dispatcher = dispatcher(transport.clone());

        let result: RpcResult<Value> = dispatcher
            .call("cancel_appointment", &json!({}), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(RpcError::Subscribe { .. })));
        assert!(transport.published().is_empty());
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_operation_rejected() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher(transport.clone());

        for operation in ["", "make/appointment", "appointments/#", "list+"] {
            let result: RpcResult<Value> = dispatcher
                .call(operation, &json!({}), Duration::from_secs(1))
                .await;
            assert!(
                matches!(result, Err(RpcError::InvalidOperation { .. })),
                "operation {operation:?} should be rejected"
            );
        }
        assert!(transport.subscribe_calls().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_consumes_entry() {
        let transport =
            MockTransport::with_responder(|_, _| Some(ScriptedReply::raw("not json at all")));
        let dispatcher = dispatcher(transport);

        let result: RpcResult<Value> = dispatcher
            .call("get_appointment", &json!({}), Duration::from_secs(1))
            .await;

        match result {
            Err(RpcError::MalformedReply { preview, .. }) => {
                assert_eq!(preview, "not json at all");
            }
            other => panic!("expected malformed reply, got {other:?}"),
        }
        assert!(dispatcher.registry().is_empty());
        assert_eq!(dispatcher.registry().stats().resolved, 1);
    }

    #[tokio::test]
    async fn test_enveloped_call_normalizes_legacy_array() {
        let transport = MockTransport::with_responder(|_, _| {
            Some(ScriptedReply::json(json!([{"id": "A1"}, {"id": "A2"}, 200])))
        });
        let dispatcher = dispatcher(transport);

        let reply: ReplyEnvelope<Vec<Value>> = dispatcher
            .call_enveloped(Operation::LIST_APPOINTMENTS, &json!({}), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(reply.data.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enveloped_call_without_status_is_malformed() {
        let transport =
            MockTransport::with_responder(|_, _| Some(ScriptedReply::json(json!({"id": "A1"}))));
        let dispatcher = dispatcher(transport);

        let result: RpcResult<ReplyEnvelope<Value>> = dispatcher
            .call_enveloped(Operation::GET_APPOINTMENT, &json!({}), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RpcError::MalformedReply { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_is_cleaned_up() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher(transport.clone());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            dispatcher.call::<_, Value>("lookup_abandoned", &json!({}), Duration::from_secs(60)),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(dispatcher.registry().is_empty());

        let stats = metrics().get_metrics().calls.operations["lookup_abandoned"].clone();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.abandoned, 1);

        // Unsubscribe runs on a spawned task
        tokio::task::yield_now().await;
        assert!(transport.active_subscriptions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscribe_is_bounded_by_call_timeout() {
        let transport = MockTransport::new();
        transport.stall_subscribes(true);
        let dispatcher = dispatcher(transport.clone());

        let started = tokio::time::Instant::now();
        let result: RpcResult<Value> = dispatcher
            .call("get_appointment", &json!({}), Duration::from_millis(300))
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(transport.subscribe_calls().len(), 1);
        assert!(transport.published().is_empty());
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_publish_is_bounded_by_call_timeout() {
        let transport = MockTransport::new();
        transport.stall_publishes(true);
        let dispatcher = dispatcher(transport.clone());

        let started = tokio::time::Instant::now();
        let result: RpcResult<Value> = dispatcher
            .call("cancel_appointment", &json!({}), Duration::from_millis(300))
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert!(dispatcher.registry().is_empty());
        assert!(transport.active_subscriptions().is_empty());
        assert_eq!(transport.unsubscribe_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_close_cancels_in_flight_call() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher(transport);

        let pending = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .call::<_, Value>("get_appointment", &json!({}), Duration::from_secs(60))
                    .await
            })
        };

        while dispatcher.registry().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.registry().close(), 1);

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(RpcError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_default_timeout_from_settings() {
        let transport = MockTransport::echo();
        let registry = Arc::new(CorrelationRegistry::new());
        ResponseDemultiplexer::attach(&transport, registry.clone()).unwrap();
        let dispatcher = RequestDispatcher::new(
            Arc::new(transport),
            registry,
            DispatcherSettings::new(DOMAIN).with_default_timeout(Duration::from_secs(3)),
        );
        assert_eq!(dispatcher.settings().default_timeout, Duration::from_secs(3));

        let reply: Value = dispatcher
            .call_with_default_timeout("list_appointments", &json!({"clinic": 1}))
            .await
            .unwrap();
        assert_eq!(reply["data"]["clinic"], 1);
    }

    #[test]
    fn test_describe_state() {
        assert_eq!(describe_state(None), "never connected");
        assert_eq!(
            describe_state(Some(ConnectionState::Reconnecting(2))),
            "reconnecting (attempt 2)"
        );
    }
}
