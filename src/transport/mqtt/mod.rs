//! MQTT v5 transport handle
//!
//! This module provides a decomposed MQTT client implementation that
//! separates pure functions from I/O operations for better testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure event routing and the inbound forwarder
//! - [`health_monitor`] - Pure health monitoring and reconnection logic
//! - [`subscriptions`] - Active topic set and SubAck matching
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_rpc_bridge::config::MqttSection;
//! use mqtt_rpc_bridge::transport::mqtt::MqttClient;
//! use mqtt_rpc_bridge::transport::DeliveryGuarantee;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     client_id_prefix: None,
//!     qos: DeliveryGuarantee::AtLeastOnce,
//!     keep_alive_secs: 60,
//! };
//!
//! let mut client = MqttClient::new("api-gateway", config, Duration::from_secs(5)).await?;
//! client.connect().await?;
//! client.subscribe("dentistimo/+/req").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod subscriptions;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMetrics, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, InboundForwarder, MessageHandler};
pub use subscriptions::SubscriptionTracker;
