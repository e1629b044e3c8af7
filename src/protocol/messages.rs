//! Wire messages exchanged with remote workers
//!
//! Requests are wrapped in a [`RequestEnvelope`] that tells the worker where to
//! reply. Replies are whatever JSON the worker emits; [`ReplyEnvelope`] gives
//! callers one normalized `{status, data}` shape on top of the ad hoc shapes
//! workers have historically produced.

use super::correlation::CorrelationId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known operation names served by the appointment workers
pub struct Operation;

impl Operation {
    pub const LIST_APPOINTMENTS: &'static str = "list_appointments";
    pub const GET_APPOINTMENT: &'static str = "get_appointment";
    pub const MAKE_APPOINTMENT: &'static str = "make_appointment";
    pub const CANCEL_APPOINTMENT: &'static str = "cancel_appointment";

    /// All operations the gateway exposes out of the box
    pub const ALL: [&'static str; 4] = [
        Self::LIST_APPOINTMENTS,
        Self::GET_APPOINTMENT,
        Self::MAKE_APPOINTMENT,
        Self::CANCEL_APPOINTMENT,
    ];
}

/// Request published to `<domain>/<operation>/req`
///
/// # Examples
/// ```
/// use mqtt_rpc_bridge::protocol::{CorrelationId, RequestEnvelope};
/// use serde_json::json;
///
/// let id = CorrelationId::new();
/// let envelope = RequestEnvelope::new(
///     id,
///     format!("dentistimo/make_appointment/res/{id}"),
///     json!({"patientId": "P1", "slot": "T1"}),
/// );
/// let wire = serde_json::to_value(&envelope).unwrap();
/// assert_eq!(wire["payload"]["patientId"], "P1");
/// assert!(wire["responseTopic"].as_str().unwrap().ends_with(&id.to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope<T> {
    /// Identifier of the call this request belongs to
    pub correlation_id: CorrelationId,
    /// Private topic the worker must publish its reply to
    pub response_topic: String,
    /// When the gateway sent the request
    pub sent_at: DateTime<Utc>,
    /// Operation-specific request body
    pub payload: T,
}

impl<T> RequestEnvelope<T> {
    pub fn new(correlation_id: CorrelationId, response_topic: String, payload: T) -> Self {
        Self {
            correlation_id,
            response_topic,
            sent_at: Utc::now(),
            payload,
        }
    }
}

/// Normalized reply shape: an operation status plus optional data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyEnvelope<T> {
    /// Operation-specific status set by the worker (HTTP-like codes)
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reasons a reply cannot be normalized
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("reply has no numeric status")]
    MissingStatus,
    #[error("reply status {0} is out of range")]
    StatusOutOfRange(u64),
    #[error("reply data does not match the expected shape: {0}")]
    DataShape(String),
}

impl ReplyEnvelope<Value> {
    /// Normalize any supported reply shape into `{status, data, message}`.
    ///
    /// Accepted shapes:
    /// - `{"status": 200, "data": ..., "message": ...}` (canonical)
    /// - `{"status": 201, "appointmentId": "A1"}` (status beside the fields;
    ///   the remaining fields become `data`)
    /// - `[item, item, 200]` (status as the last array element; the remaining
    ///   elements become `data`)
    pub fn normalize(reply: Value) -> Result<Self, EnvelopeError> {
        match reply {
            Value::Object(mut fields) => {
                let status = take_status(fields.remove("status"))?;
                let message = match fields.remove("message") {
                    Some(Value::String(message)) => Some(message),
                    Some(other) => {
                        // Not a human-readable message; keep it as data
                        fields.insert("message".to_string(), other);
                        None
                    }
                    None => None,
                };

                let data = if is_canonical(&fields) {
                    fields.remove("data").filter(|data| !data.is_null())
                } else if fields.is_empty() {
                    None
                } else {
                    Some(Value::Object(fields))
                };

                Ok(Self {
                    status,
                    data,
                    message,
                })
            }
            Value::Array(mut items) => {
                let status = take_status(items.pop())?;
                Ok(Self {
                    status,
                    data: Some(Value::Array(items)),
                    message: None,
                })
            }
            _ => Err(EnvelopeError::MissingStatus),
        }
    }

    /// Decode `data` into the caller's expected type
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ReplyEnvelope<T>, EnvelopeError> {
        let data = self
            .data
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| EnvelopeError::DataShape(e.to_string()))?;

        Ok(ReplyEnvelope {
            status: self.status,
            data,
            message: self.message,
        })
    }
}

impl<T> ReplyEnvelope<T> {
    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn take_status(value: Option<Value>) -> Result<u16, EnvelopeError> {
    let status = value
        .as_ref()
        .and_then(Value::as_u64)
        .ok_or(EnvelopeError::MissingStatus)?;
    u16::try_from(status).map_err(|_| EnvelopeError::StatusOutOfRange(status))
}

/// After `status` and `message` are removed, a canonical envelope holds at
/// most a `data` field.
fn is_canonical(fields: &Map<String, Value>) -> bool {
    fields.contains_key("data") && fields.len() == 1
}
