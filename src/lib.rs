//! MQTT request/response bridge
//!
//! Synchronous-style calls over a publish/subscribe broker. Each call gets a
//! unique correlation id and a private response topic; a single
//! demultiplexer hands each reply to the caller waiting on that topic, and
//! every call is bounded by a timeout.
//!
//! # Overview
//!
//! - Topic conventions and the request/reply envelopes ([`protocol`])
//! - MQTT v5 transport with reconnection and SubAck tracking ([`transport`])
//! - Correlation registry, demultiplexer and dispatcher ([`rpc`])
//! - Gateway lifecycle over an injected transport ([`gateway`])
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_rpc_bridge::rpc::{CorrelationRegistry, DispatcherSettings, RequestDispatcher, ResponseDemultiplexer};
//! use mqtt_rpc_bridge::testing::MockTransport;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! // A worker that answers {status: 200, data: <request payload>}
//! let transport = MockTransport::echo();
//! let registry = Arc::new(CorrelationRegistry::new());
//! ResponseDemultiplexer::attach(&transport, registry.clone())?;
//!
//! let dispatcher = RequestDispatcher::new(
//!     Arc::new(transport),
//!     registry,
//!     DispatcherSettings::new("dentistimo"),
//! );
//!
//! let reply: Value = dispatcher
//!     .call("get_appointment", &json!({"appointmentId": "A1"}), Duration::from_secs(2))
//!     .await?;
//! assert_eq!(reply["data"]["appointmentId"], "A1");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod rpc;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, RpcError, RpcResult};
pub use gateway::Gateway;
pub use protocol::*;
pub use rpc::{CorrelationRegistry, DispatcherSettings, RequestDispatcher, ResponseDemultiplexer};
pub use transport::{DeliveryGuarantee, InboundMessage, MessageSink, Transport};
