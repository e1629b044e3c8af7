//! Testing utilities and mock implementations
//!
//! This module provides an in-memory transport so the request/response core
//! can be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
