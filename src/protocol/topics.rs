//! Topic construction and topic-level validation
//!
//! Requests travel on `<domain>/<operation>/req`; every call gets a private
//! reply topic `<domain>/<operation>/res/<correlation_id>` that is embedded in
//! the request envelope so the worker knows where to answer.

use super::correlation::CorrelationId;
use thiserror::Error;

/// Suffix of the well-known request topic for an operation
pub const REQUEST_SUFFIX: &str = "req";

/// Level separating the operation from the correlation id in reply topics
pub const RESPONSE_LEVEL: &str = "res";

/// Normalize a topic: collapse repeated separators, strip leading and trailing
/// separators. MQTT treats `a//b` and `/a/b` as distinct topics, so every topic
/// this crate emits goes through here first.
pub fn canonicalize_topic(topic: &str) -> String {
    topic
        .split('/')
        .filter(|level| !level.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Validate a single topic level (domain or operation name).
///
/// Levels must be non-empty and must not contain the level separator or the
/// MQTT wildcards, otherwise a request could fan out to unintended topics.
pub fn validate_topic_level(level: &str) -> Result<(), ValidationError> {
    if level.is_empty() {
        return Err(ValidationError::EmptyTopicLevel);
    }

    for ch in level.chars() {
        if matches!(ch, '/' | '+' | '#' | '\0') || ch.is_whitespace() {
            return Err(ValidationError::InvalidTopicLevelChar(ch));
        }
    }

    Ok(())
}

/// Validate a gateway identifier (`[a-zA-Z0-9._-]+`)
pub fn validate_gateway_id(gateway_id: &str) -> Result<(), ValidationError> {
    if gateway_id.is_empty() {
        return Err(ValidationError::EmptyGatewayId);
    }

    for ch in gateway_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidGatewayIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic construction
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic level cannot be empty")]
    EmptyTopicLevel,
    #[error("Topic level contains invalid character: '{0}'")]
    InvalidTopicLevelChar(char),
    #[error("Gateway ID cannot be empty")]
    EmptyGatewayId,
    #[error("Gateway ID contains invalid character: '{0}'")]
    InvalidGatewayIdChar(char),
}

/// Topic construction for the request/response convention
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build the well-known request topic: `<domain>/<operation>/req`
    pub fn request_topic(domain: &str, operation: &str) -> String {
        canonicalize_topic(&format!("{domain}/{operation}/{REQUEST_SUFFIX}"))
    }

    /// Build the private reply topic: `<domain>/<operation>/res/<correlation_id>`
    pub fn response_topic(domain: &str, operation: &str, correlation_id: &CorrelationId) -> String {
        canonicalize_topic(&format!(
            "{domain}/{operation}/{RESPONSE_LEVEL}/{correlation_id}"
        ))
    }

    /// Subscription filter matching every request topic in a domain
    pub fn request_filter(domain: &str) -> String {
        canonicalize_topic(&format!("{domain}/+/{REQUEST_SUFFIX}"))
    }

    /// Extract the operation name from a request topic, if it is one
    pub fn operation_from_request_topic<'a>(domain: &str, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(domain)?.strip_prefix('/')?;
        let operation = rest.strip_suffix(REQUEST_SUFFIX)?.strip_suffix('/')?;
        (!operation.is_empty() && !operation.contains('/')).then_some(operation)
    }
}
