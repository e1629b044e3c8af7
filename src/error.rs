//! Error types for request/response calls and gateway lifecycle
//!
//! Transport and configuration errors live next to their modules
//! ([`MqttError`](crate::transport::mqtt::MqttError),
//! [`ConfigError`](crate::config::ConfigError)); this module holds the
//! errors callers of the dispatcher and the gateway see.

use crate::config::ConfigError;
use crate::protocol::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Longest reply excerpt carried by [`RpcError::MalformedReply`]
const PREVIEW_LIMIT: usize = 200;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single call
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport unavailable: {state}")]
    TransportUnavailable { state: String },

    #[error("Failed to publish request for {operation}")]
    Publish {
        operation: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to subscribe to {topic}")]
    Subscribe {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("Request {operation} timed out after {}ms", timeout.as_millis())]
    RequestTimeout { operation: String, timeout: Duration },

    #[error("Response topic already registered: {topic}")]
    DuplicateCorrelation { topic: String },

    #[error("Malformed reply for {operation}: {reason} (payload: {preview})")]
    MalformedReply {
        operation: String,
        reason: String,
        preview: String,
    },

    #[error("Invalid operation name '{operation}': {reason}")]
    InvalidOperation {
        operation: String,
        reason: ValidationError,
    },

    #[error("Failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Call cancelled: {0}")]
    Cancelled(String),
}

impl RpcError {
    pub fn transport_unavailable<S: Into<String>>(state: S) -> Self {
        Self::TransportUnavailable {
            state: state.into(),
        }
    }

    pub fn publish<S, E>(operation: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Publish {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn subscribe<S, E>(topic: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Subscribe {
            topic: topic.into(),
            source: Box::new(source),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        Self::RequestTimeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Reply that could not be decoded; keeps a sanitized excerpt of the raw
    /// payload for diagnostics
    pub fn malformed_reply<S, R>(operation: S, reason: R, payload: &[u8]) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        let raw = String::from_utf8_lossy(payload);
        Self::MalformedReply {
            operation: operation.into(),
            reason: reason.into(),
            preview: truncate(&sanitize_payload(&raw), PREVIEW_LIMIT),
        }
    }

    /// Short stable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::TransportUnavailable { .. } => "transport_unavailable",
            RpcError::Publish { .. } => "publish",
            RpcError::Subscribe { .. } => "subscribe",
            RpcError::RequestTimeout { .. } => "timeout",
            RpcError::DuplicateCorrelation { .. } => "duplicate_correlation",
            RpcError::MalformedReply { .. } => "malformed_reply",
            RpcError::InvalidOperation { .. } => "invalid_operation",
            RpcError::Serialization(_) => "serialization",
            RpcError::Cancelled(_) => "cancelled",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::RequestTimeout { .. })
    }
}

/// Gateway construction and lifecycle failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Gateway already started")]
    AlreadyStarted,

    #[error("Gateway not started")]
    NotStarted,

    #[error("Health server error: {0}")]
    Health(String),
}

impl GatewayError {
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(error))
    }
}

/// Result type for calls
pub type RpcResult<T> = Result<T, RpcError>;

static SECRET_FIELD: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?i)"?(password|token|key|secret)"?\s*[=:]\s*("[^"]*"|[^\s,}]+)"#).ok()
});

/// Mask credential-looking fields before a payload reaches logs or errors
pub(crate) fn sanitize_payload(message: &str) -> String {
    match SECRET_FIELD.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}=***").to_string(),
        None => message.to_string(),
    }
}

/// Cut to at most `limit` bytes on a char boundary
pub(crate) fn truncate(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        return message.to_string();
    }
    let suffix = "...[truncated]";
    let mut end = limit.saturating_sub(suffix.len());
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &message[..end], suffix)
}
