//! Gateway lifecycle
//!
//! Owns the shared transport and the correlation registry. `start` connects
//! and binds the response demultiplexer exactly once; `shutdown` cancels
//! every waiting call and then disconnects.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::observability::metrics::metrics;
use crate::rpc::{CorrelationRegistry, DispatcherSettings, RequestDispatcher, ResponseDemultiplexer};
use crate::transport::mqtt::MqttClient;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Request/response gateway over an injected transport
pub struct Gateway<T>
where
    T: Transport + 'static,
{
    config: GatewayConfig,
    /// Held here until `start` moves it behind an `Arc`
    transport: Option<T>,
    registry: Arc<CorrelationRegistry>,
    dispatcher: Option<RequestDispatcher<T>>,
}

impl Gateway<MqttClient> {
    /// Build a gateway backed by an MQTT client created from `config`
    pub async fn connect_mqtt(config: GatewayConfig) -> Result<Self, GatewayError> {
        let transport = MqttClient::new(
            config.client_id_prefix(),
            config.mqtt.clone(),
            config.rpc.subscribe_timeout(),
        )
        .await
        .map_err(GatewayError::transport)?;
        Ok(Self::new(config, transport))
    }
}

impl<T> Gateway<T>
where
    T: Transport + 'static,
{
    /// Create a gateway; nothing is connected until [`start`](Self::start)
    pub fn new(config: GatewayConfig, transport: T) -> Self {
        metrics().set_gateway_state("initialized");
        Self {
            config,
            transport: Some(transport),
            registry: Arc::new(CorrelationRegistry::new()),
            dispatcher: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Connect the transport and bind the demultiplexer
    pub async fn start(&mut self) -> Result<(), GatewayError> {
        let span = crate::lifecycle_span!(gateway_id = %self.config.gateway.id, event = "start");
        async {
            let Some(mut transport) = self.transport.take() else {
                return Err(GatewayError::AlreadyStarted);
            };

            info!(broker_url = %self.config.mqtt.broker_url, "Starting gateway");
            metrics().set_gateway_state("starting");

            if let Err(e) = transport.connect().await {
                error!(error = %e, "Transport connection failed");
                metrics().set_gateway_state("error");
                self.transport = Some(transport);
                return Err(GatewayError::transport(e));
            }

            ResponseDemultiplexer::attach(&transport, self.registry.clone())
                .map_err(GatewayError::transport)?;

            self.dispatcher = Some(RequestDispatcher::new(
                Arc::new(transport),
                self.registry.clone(),
                DispatcherSettings::from_config(&self.config),
            ));
            metrics().set_gateway_state("running");
            info!(domain = %self.config.gateway.domain, "Gateway running");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Dispatcher for issuing calls; cheap to clone into handlers
    pub fn dispatcher(&self) -> Result<&RequestDispatcher<T>, GatewayError> {
        self.dispatcher.as_ref().ok_or(GatewayError::NotStarted)
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Shared transport, once started
    pub fn transport(&self) -> Option<&Arc<T>> {
        self.dispatcher.as_ref().map(RequestDispatcher::transport)
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some() && !self.registry.is_closed()
    }

    /// True once the transport has given up reconnecting
    pub fn is_permanently_disconnected(&self) -> bool {
        self.transport()
            .is_some_and(|transport| transport.is_permanently_disconnected())
    }

    /// Cancel waiting calls, then disconnect. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<(), GatewayError> {
        let span = crate::lifecycle_span!(gateway_id = %self.config.gateway.id, event = "shutdown");
        async {
            metrics().set_gateway_state("stopping");

            let cancelled = self.registry.close();
            if cancelled > 0 {
                warn!(cancelled, "Cancelled calls still waiting at shutdown");
            }

            if let Some(transport) = self.transport() {
                if let Err(e) = transport.disconnect().await {
                    error!(error = %e, "Error disconnecting transport");
                    metrics().set_gateway_state("error");
                    return Err(GatewayError::transport(e));
                }
            }

            metrics().set_gateway_state("stopped");
            info!("Gateway stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::testing::mocks::{MockTransport, ScriptedReply};
    use serde_json::{json, Value};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatcher_requires_start() {
        let gateway = Gateway::new(GatewayConfig::test_config(), MockTransport::disconnected());
        assert!(matches!(gateway.dispatcher(), Err(GatewayError::NotStarted)));
        assert!(!gateway.is_running());
        assert!(gateway.transport().is_none());
    }

    #[tokio::test]
    async fn test_start_connects_and_binds_demux() {
        let transport = MockTransport::disconnected();
        let mut gateway = Gateway::new(GatewayConfig::test_config(), transport.clone());

        gateway.start().await.unwrap();

        assert!(transport.is_connected());
        assert!(transport.has_sink());
        assert!(gateway.is_running());
        assert!(matches!(gateway.start().await, Err(GatewayError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_calls_use_configured_domain() {
        let transport = MockTransport::disconnected();
        transport.set_responder(|_, _| Some(ScriptedReply::json(json!({"status": 200}))));
        let mut gateway = Gateway::new(GatewayConfig::test_config(), transport.clone());
        gateway.start().await.unwrap();

        let reply: Value = gateway
            .dispatcher()
            .unwrap()
            .call_with_default_timeout("list_appointments", &json!({}))
            .await
            .unwrap();

        assert_eq!(reply["status"], 200);
        assert_eq!(transport.published_to("dentistimo/list_appointments/req").len(), 1);
    }

    #[tokio::test]
    async fn test_default_timeout_comes_from_config() {
        let mut gateway = Gateway::new(GatewayConfig::test_config(), MockTransport::new());
        gateway.start().await.unwrap();

        let settings = gateway.dispatcher().unwrap().settings();
        assert_eq!(settings.default_timeout, Duration::from_millis(2000));
        assert_eq!(settings.domain, "dentistimo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_waiting_calls() {
        let mut gateway = Gateway::new(GatewayConfig::test_config(), MockTransport::new());
        gateway.start().await.unwrap();

        let dispatcher = gateway.dispatcher().unwrap().clone();
        let pending = tokio::spawn(async move {
            dispatcher
                .call::<_, Value>("get_appointment", &json!({}), Duration::from_secs(30))
                .await
        });
        while gateway.registry().is_empty() {
            tokio::task::yield_now().await;
        }

        gateway.shutdown().await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(RpcError::Cancelled(_))));
        assert!(!gateway.is_running());
        assert!(!gateway.transport().unwrap().is_connected());

        // New calls are refused once stopped
        let result: Result<Value, RpcError> = gateway
            .dispatcher()
            .unwrap()
            .call("get_appointment", &json!({}), Duration::from_secs(1))
            .await;
        assert!(result.is_err());

        gateway.shutdown().await.unwrap();
    }
}
