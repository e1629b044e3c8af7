//! Request/response correlation over a publish/subscribe transport
//!
//! - [`CorrelationRegistry`] maps each in-flight call's response topic to
//!   its waiter.
//! - [`ResponseDemultiplexer`] is the transport's single inbound sink and
//!   hands replies to waiters by topic.
//! - [`RequestDispatcher`] is what callers use: it registers, subscribes,
//!   publishes and waits with a timeout.

pub mod demux;
pub mod dispatcher;
pub mod registry;

pub use demux::ResponseDemultiplexer;
pub use dispatcher::{DEFAULT_CALL_TIMEOUT, DispatcherSettings, RequestDispatcher};
pub use registry::{CorrelationRegistry, RegistryStats, ReplyOutcome, ReplyReceiver};
