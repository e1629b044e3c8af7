//! Wire protocol between the gateway and remote workers
//!
//! Topic naming, correlation identifiers and the request/reply envelopes.

pub mod correlation;
pub mod messages;
pub mod topics;

pub use correlation::CorrelationId;
pub use messages::*;
pub use topics::*;
