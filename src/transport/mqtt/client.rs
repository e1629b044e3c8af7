//! Impure I/O operations for MQTT client
//!
//! This module handles all impure I/O operations including network communication,
//! async coordination, and integration with the rumqttc client.

use super::connection::{configure_mqtt_options, qos_for, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, InboundForwarder, MessageHandler};
use super::subscriptions::{AckOutcome, AckReceiver, SubscriptionTracker};
use crate::config::MqttSection;
use crate::observability::metrics::metrics;
use crate::transport::{DeliveryGuarantee, InboundMessage, MessageSink, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, ClientError, EventLoop};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between `AsyncClient` and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Pause before retrying a request the full channel refused
const HANDOFF_RETRY_DELAY: Duration = Duration::from_millis(20);

/// The client of the current broker session. Replaced wholesale on
/// reconnect; never locked across an `.await`.
type SharedClient = Arc<std::sync::Mutex<AsyncClient>>;

fn lock_client(client: &SharedClient) -> std::sync::MutexGuard<'_, AsyncClient> {
    client.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hand one request to the event loop with a non-blocking `try_*` call made
/// under the client lock. A full channel is retried until `deadline`, so a
/// stalled event loop can delay a caller but never wedge the session swap.
async fn hand_off<R>(
    client: &SharedClient,
    deadline: tokio::time::Instant,
    mut attempt: impl FnMut(&AsyncClient) -> Result<R, ClientError>,
) -> Result<R, ClientError> {
    loop {
        let result = attempt(&lock_client(client));
        match result {
            Err(ClientError::TryRequest(_)) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(HANDOFF_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

/// Queue a SubAck waiter and hand the SUBSCRIBE to `client` in one step.
/// Callers hold the client lock, so queue order always matches the order
/// requests enter the channel.
fn send_subscribe(
    client: &AsyncClient,
    subscriptions: &SubscriptionTracker,
    topic: &str,
) -> Result<AckReceiver, ClientError> {
    let (ack_id, ack) = subscriptions.expect_ack(topic);
    match client.try_subscribe(topic, QoS::AtLeastOnce) {
        Ok(()) => Ok(ack),
        Err(e) => {
            subscriptions.discard(ack_id);
            Err(e)
        }
    }
}

/// Install the client of a new session. SUBSCRIBEs handed to the previous
/// client will never be acknowledged, so their waiters fail here, under the
/// same lock subscribers queue under. Returns how many waiters failed.
fn replace_session(
    shared: &SharedClient,
    subscriptions: &SubscriptionTracker,
    new_client: AsyncClient,
) -> usize {
    let mut client = lock_client(shared);
    *client = new_client;
    subscriptions.fail_pending("broker session replaced")
}

#[derive(Debug, Default)]
struct LinkStats {
    connect_time: Option<Instant>,
    last_message_time: Option<Instant>,
    reconnect_count: u32,
}

type SharedLinkStats = Arc<std::sync::Mutex<LinkStats>>;

fn lock_stats(stats: &SharedLinkStats) -> std::sync::MutexGuard<'_, LinkStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Long-lived MQTT connection shared by every in-flight call
pub struct MqttClient {
    client_id_prefix: String,
    config: MqttSection,
    client: SharedClient,
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    event_loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    /// Bounds both the SubAck wait and handing a request to a busy event loop
    subscribe_timeout: Duration,
    subscriptions: Arc<SubscriptionTracker>,
    forwarder: Arc<InboundForwarder>,
    link: SharedLinkStats,
}

impl MqttClient {
    pub async fn new(
        client_id_prefix: &str,
        config: MqttSection,
        subscribe_timeout: Duration,
    ) -> Result<Self, MqttError> {
        let (client, event_loop) = Self::create_connection(client_id_prefix, &config)?;

        Ok(MqttClient {
            client_id_prefix: client_id_prefix.to_string(),
            config,
            client: Arc::new(std::sync::Mutex::new(client)),
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            event_loop_handle: std::sync::Mutex::new(None),
            state_rx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            subscribe_timeout,
            subscriptions: Arc::new(SubscriptionTracker::new()),
            forwarder: Arc::new(InboundForwarder::new()),
            link: Arc::new(std::sync::Mutex::new(LinkStats::default())),
        })
    }

    /// Replace the reconnection policy; only effective before `connect()`
    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Helper method to create new MQTT connection and event loop
    /// Used for initial connection and reconnection attempts
    fn create_connection(
        client_id_prefix: &str,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(client_id_prefix, config)?;
        Ok(AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting => continue,
                    ConnectionState::Reconnecting(_) => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Connect to the broker and start the reconnection supervisor.
    /// Only returns success once the broker sent ConnAck.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailedStr("Event loop already started".to_string())
            })?;

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let supervisor = Supervisor {
            client_id_prefix: self.client_id_prefix.clone(),
            config: self.config.clone(),
            shared_client: self.client.clone(),
            reconnect_config: self.reconnect_config.clone(),
            handoff_timeout: self.subscribe_timeout,
            subscriptions: self.subscriptions.clone(),
            forwarder: self.forwarder.clone(),
            link: self.link.clone(),
            state_tx,
            shutdown_rx,
            reconnect_attempts: 0,
            has_connected: false,
        };

        metrics().mqtt_connection_attempt();
        let handle = tokio::spawn(supervisor.run(event_loop));
        *self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        Self::wait_for_connection_confirmation(state_rx, connection_timeout).await
    }

    /// Stop the supervisor and close the broker session
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let Some(shutdown_tx) = &self.shutdown_tx else {
            debug!("Disconnect requested on a client that never connected");
            return Ok(());
        };

        let _ = shutdown_tx.send(true);
        info!("Sent shutdown signal to reconnection supervisor");

        // Best effort: the broker session may already be gone
        if let Err(e) = lock_client(&self.client).try_disconnect() {
            debug!("MQTT disconnect request not delivered: {}", e);
        }

        self.subscriptions.fail_pending("client disconnected");

        let handle = self
            .event_loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => info!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    abort.abort();
                }
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Get current connection state
    /// Returns None if connection hasn't been established yet
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Get health metrics for the connection
    pub fn get_health_metrics(&self) -> HealthMetrics {
        let state = self.connection_state();
        let link = lock_stats(&self.link);
        HealthMonitor::calculate_health_metrics(
            state.as_ref(),
            link.connect_time,
            link.last_message_time,
            link.reconnect_count,
        )
    }

    /// Number of topics currently subscribed
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_count()
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state_rx = self.state_rx.as_ref().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not connected: state_rx is None".to_string())
        })?;

        let current_state = state_rx.borrow().clone();
        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), MqttError> {
        if let Err(e) = self.check_connection_state() {
            metrics().mqtt_publish_failed();
            return Err(e);
        }

        let payload = Bytes::from(payload);
        let qos = qos_for(guarantee);
        let deadline = tokio::time::Instant::now() + self.subscribe_timeout;
        let result = hand_off(&self.client, deadline, |client| {
            client.try_publish(topic, qos, false, payload.clone())
        })
        .await
        .map_err(|e| MqttError::PublishFailed(Box::new(e)));

        match &result {
            Ok(()) => {
                metrics().mqtt_message_published();
                debug!(topic = %topic, ?guarantee, "Published message");
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                warn!(topic = %topic, error = %e, "Publish failed");
            }
        }
        result
    }

    /// Subscribe and wait for the broker's SubAck
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        if let Some(state_rx) = &self.state_rx {
            let current_state = state_rx.borrow().clone();
            if !HealthMonitor::can_subscribe(&current_state) {
                return Err(MqttError::NotConnected {
                    state: current_state,
                });
            }
        } else {
            self.check_connection_state()?;
        }

        if self.subscriptions.is_active(topic) {
            debug!(topic = %topic, "Already subscribed");
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.subscribe_timeout;
        let ack = hand_off(&self.client, deadline, |client| {
            send_subscribe(client, &self.subscriptions, topic)
        })
        .await
        .map_err(|e| {
            MqttError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into())
        })?;

        match tokio::time::timeout_at(deadline, ack).await {
            Ok(Ok(result)) => {
                if result.is_ok() {
                    debug!(topic = %topic, "Subscription acknowledged");
                }
                result
            }
            Ok(Err(_)) => Err(MqttError::SubscriptionFailed(
                format!("SubAck waiter for {topic} dropped").into(),
            )),
            Err(_) => Err(MqttError::SubscriptionTimeout(topic.to_string())),
        }
    }

    /// Unsubscribe; unknown topics are a no-op
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        if !self.subscriptions.remove(topic) {
            debug!(topic = %topic, "Unsubscribe for inactive topic ignored");
            return Ok(());
        }

        // Without a live session the broker already forgot the subscription
        if self.check_connection_state().is_err() {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.subscribe_timeout;
        hand_off(&self.client, deadline, |client| client.try_unsubscribe(topic))
            .await
            .map_err(|e| MqttError::UnsubscribeFailed(Box::new(e)))?;
        debug!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    pub fn set_message_sink(&self, sink: Arc<dyn MessageSink>) -> Result<(), MqttError> {
        if self.forwarder.set_sink(sink) {
            Ok(())
        } else {
            Err(MqttError::SinkAlreadyRegistered)
        }
    }
}

/// State owned by the background task that polls the event loop and
/// replaces the connection after failures
struct Supervisor {
    client_id_prefix: String,
    config: MqttSection,
    shared_client: SharedClient,
    reconnect_config: ReconnectConfig,
    handoff_timeout: Duration,
    subscriptions: Arc<SubscriptionTracker>,
    forwarder: Arc<InboundForwarder>,
    link: SharedLinkStats,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect_attempts: u32,
    has_connected: bool,
}

impl Supervisor {
    async fn run(mut self, event_loop: EventLoop) {
        info!(
            "Starting MQTT event loop with reconnection supervisor for client: {}",
            self.client_id_prefix
        );
        let mut event_loop = event_loop;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                // Check for shutdown signal first (higher priority)
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping reconnection supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Err(e) => self.handle_event_loop_error(e, &mut event_loop).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        let permanent = matches!(
            *self.state_tx.borrow(),
            ConnectionState::PermanentlyDisconnected(_)
        );
        if !permanent {
            self.transition(ConnectionEvent::ClientDisconnected);
        }
        info!("MQTT event loop stopped for client: {}", self.client_id_prefix);
    }

    fn transition(&self, event: ConnectionEvent) {
        let new_state = HealthMonitor::determine_next_state(event);
        let previous = self.state_tx.borrow().clone();
        HealthMonitor::log_state_transition(&previous, &new_state);
        let _ = self.state_tx.send(new_state);
    }

    /// Returns true to continue loop, false to break
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.transition(ConnectionEvent::ConnAckReceived);
                metrics().mqtt_connection_established();
                self.reconnect_attempts = 0;
                {
                    let mut link = lock_stats(&self.link);
                    if self.has_connected {
                        link.reconnect_count += 1;
                    }
                    link.connect_time = Some(Instant::now());
                }
                if self.has_connected {
                    self.spawn_resubscribe();
                }
                self.has_connected = true;
                true
            }
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                if MessageHandler::should_process_message(&topic, retain) {
                    lock_stats(&self.link).last_message_time = Some(Instant::now());
                    metrics().mqtt_message_received();
                    self.forwarder.forward(InboundMessage::new(topic, payload));
                }
                true
            }
            EventRoute::Disconnected => {
                self.transition(ConnectionEvent::DisconnectedByBroker);
                metrics().mqtt_connection_lost();
                self.subscriptions.fail_pending("broker disconnected");
                self.attempt_reconnection(event_loop).await
            }
            EventRoute::SubscribeSent { packet_id } => {
                self.subscriptions.on_subscribe_sent(packet_id);
                true
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                match self.subscriptions.on_suback(packet_id, &failures) {
                    AckOutcome::Accepted { topic } => {
                        debug!(target: "mqtt_transport", "Subscription confirmed: {}", topic);
                    }
                    AckOutcome::Rejected { topic, reason } => {
                        warn!(topic = %topic, reason = %reason, "Subscription rejected by broker");
                    }
                    AckOutcome::Orphaned { topic } => self.spawn_unsubscribe(topic),
                    AckOutcome::Unknown => {
                        debug!(packet_id, "SubAck for unknown packet id");
                    }
                }
                true
            }
            EventRoute::UnsubscriptionConfirmed { packet_id } => {
                debug!(target: "mqtt_transport", "Unsubscription confirmed: {}", packet_id);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Returns true to continue loop (after reconnection), false to break
    async fn handle_event_loop_error(
        &mut self,
        error: rumqttc::v5::ConnectionError,
        event_loop: &mut EventLoop,
    ) -> bool {
        let was_connected = matches!(*self.state_tx.borrow(), ConnectionState::Connected);
        let error_str = error.to_string();
        self.transition(ConnectionEvent::NetworkError(error_str.clone()));

        if was_connected {
            metrics().mqtt_connection_lost();
        } else {
            metrics().mqtt_connection_failed();
        }
        self.subscriptions.fail_pending(&error_str);

        error!(
            "MQTT event loop error for client {}: {}",
            self.client_id_prefix, error
        );

        self.attempt_reconnection(event_loop).await
    }

    /// Restore subscriptions on the new session. Runs detached so the event
    /// loop keeps draining the request channel while SUBSCRIBEs queue up.
    fn spawn_resubscribe(&self) {
        let topics = self.subscriptions.active_topics();
        if topics.is_empty() {
            return;
        }
        let client = self.shared_client.clone();
        let subscriptions = self.subscriptions.clone();
        let deadline = tokio::time::Instant::now() + self.handoff_timeout;
        tokio::spawn(async move {
            for topic in &topics {
                let sent = hand_off(&client, deadline, |client| {
                    let ack_id = subscriptions.expect_silent_ack(topic);
                    client
                        .try_subscribe(topic.as_str(), QoS::AtLeastOnce)
                        .map_err(|e| {
                            subscriptions.discard(ack_id);
                            e
                        })
                })
                .await;
                match sent {
                    Ok(()) => debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic),
                    Err(e) => error!("Failed to re-subscribe to {}: {}", topic, e),
                }
            }
        });
    }

    fn spawn_unsubscribe(&self, topic: String) {
        let client = self.shared_client.clone();
        let deadline = tokio::time::Instant::now() + self.handoff_timeout;
        tokio::spawn(async move {
            debug!(topic = %topic, "Withdrawing subscription nobody waited for");
            let withdrawn =
                hand_off(&client, deadline, |client| client.try_unsubscribe(topic.as_str())).await;
            if let Err(e) = withdrawn {
                warn!("Failed to withdraw subscription {}: {}", topic, e);
            }
        });
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    /// Swap in a fresh client and event loop. Failures are retried on the
    /// next loop iteration.
    fn apply_new_connection(&self, event_loop: &mut EventLoop) -> bool {
        match MqttClient::create_connection(&self.client_id_prefix, &self.config) {
            Ok((new_client, new_event_loop)) => {
                info!("Created new connection for reconnection attempt");
                let failed = replace_session(&self.shared_client, &self.subscriptions, new_client);
                if failed > 0 {
                    debug!(failed, "Failed SubAck waiters left on the previous session");
                }
                *event_loop = new_event_loop;
                metrics().mqtt_connection_attempt();
                true
            }
            Err(e) => {
                error!("Failed to create new connection: {}", e);
                true
            }
        }
    }

    async fn attempt_reconnection(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.transition(ConnectionEvent::ReconnectionStarted(attempt));

                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }

                if *self.shutdown_rx.borrow() {
                    info!("Shutdown signal received, aborting reconnection");
                    return false;
                }

                self.apply_new_connection(event_loop)
            }
            ReconnectionDecision::AbortShutdownRequested => {
                info!("Shutdown signal received, stopping reconnection");
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                self.transition(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, guarantee).await
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, topic).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Self::Error> {
        MqttClient::unsubscribe(self, topic).await
    }

    fn set_message_sink(&self, sink: Arc<dyn MessageSink>) -> Result<(), Self::Error> {
        MqttClient::set_message_sink(self, sink)
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let handle = self
            .event_loop_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
