//! Echo worker for manual end-to-end checks
//!
//! Subscribes to every request topic of a domain and answers each request on
//! its embedded response topic with `{status, data: <request payload>}`.
//!
//! ## Usage
//!
//! ```bash
//! # Answer everything under dentistimo/+/req
//! echo-worker --domain dentistimo
//!
//! # Slow worker, useful for watching calls time out
//! echo-worker --domain dentistimo --delay-ms 7000
//!
//! # Then, from another shell
//! rpc-bridge -c gateway.toml call make_appointment --payload '{"patientId":"P1","slot":"T1"}'
//! ```

use clap::Parser;
use mqtt_rpc_bridge::config::MqttSection;
use mqtt_rpc_bridge::observability::init_default_logging;
use mqtt_rpc_bridge::protocol::TopicBuilder;
use mqtt_rpc_bridge::transport::mqtt::MqttClient;
use mqtt_rpc_bridge::transport::{DeliveryGuarantee, InboundMessage, MessageSink, Transport};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(
    name = "echo-worker",
    about = "Answer bridge requests by echoing their payload",
    long_about = "Subscribes to <domain>/+/req and replies to each request's responseTopic.\nUseful for exercising the gateway against a real broker."
)]
struct Args {
    /// MQTT broker URL
    #[arg(long, env = "BROKER_URL", default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// First topic level of request topics
    #[arg(long, default_value = "dentistimo")]
    domain: String,

    /// Status code put in every reply
    #[arg(long, default_value_t = 200)]
    status: u16,

    /// Delay before answering, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

/// Hands inbound requests to the worker loop
struct ChannelSink {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl MessageSink for ChannelSink {
    fn deliver(&self, message: InboundMessage) {
        if self.sender.send(message).is_err() {
            warn!("Worker loop has stopped, dropping request");
        }
    }
}

/// Reply for one request, or None if the request has no response topic
fn build_reply(request: &Value, status: u16) -> Option<(String, Value)> {
    let response_topic = request.get("responseTopic")?.as_str()?.to_string();
    let data = request.get("payload").cloned().unwrap_or(Value::Null);
    Some((response_topic, json!({"status": status, "data": data})))
}

async fn answer(
    client: Arc<MqttClient>,
    message: InboundMessage,
    domain: String,
    status: u16,
    delay: Duration,
) {
    let operation =
        TopicBuilder::operation_from_request_topic(&domain, &message.topic).unwrap_or("?");

    let request: Value = match serde_json::from_slice(&message.payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "Ignoring request that is not JSON");
            return;
        }
    };
    let Some((response_topic, reply)) = build_reply(&request, status) else {
        warn!(topic = %message.topic, "Ignoring request without responseTopic");
        return;
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let correlation_id = request
        .get("correlationId")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match client
        .publish(
            &response_topic,
            reply.to_string().into_bytes(),
            DeliveryGuarantee::AtLeastOnce,
        )
        .await
    {
        Ok(()) => info!(operation, correlation_id, "Replied"),
        Err(e) => error!(operation, correlation_id, error = %e, "Failed to publish reply"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_default_logging();

    let config = MqttSection {
        broker_url: args.broker_url.clone(),
        username_env: None,
        password_env: None,
        client_id_prefix: None,
        qos: DeliveryGuarantee::AtLeastOnce,
        keep_alive_secs: 60,
    };

    let mut client = MqttClient::new("echo-worker", config, Duration::from_secs(5)).await?;
    let (sender, mut requests) = mpsc::unbounded_channel();
    client.set_message_sink(Arc::new(ChannelSink { sender }))?;
    client.connect().await?;

    let filter = TopicBuilder::request_filter(&args.domain);
    client.subscribe(&filter).await?;
    info!(broker_url = %args.broker_url, filter = %filter, "Echo worker ready");

    let client = Arc::new(client);
    let delay = Duration::from_millis(args.delay_ms);

    loop {
        tokio::select! {
            message = requests.recv() => {
                let Some(message) = message else { break };
                debug!(topic = %message.topic, "Request received");
                tokio::spawn(answer(client.clone(), message, args.domain.clone(), args.status, delay));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
