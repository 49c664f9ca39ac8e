//! Strict JSON codec for envelopes.
//!
//! Decoding is two-phase: the envelope is read with a raw JSON payload, its
//! metadata is checked against what the consumer expects, and only then is the
//! payload typed. Every failure here marks the record as a poison message.

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::contract::SCHEMA_VERSION;
use crate::envelope::EventEnvelope;
use crate::event::IntegrationEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported schema version {found} (this build reads {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("unexpected event type {found:?} (expected {expected:?})")]
    UnexpectedType { expected: &'static str, found: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to encode envelope: {0}")]
pub struct EncodeError(pub String);

pub fn encode<E: IntegrationEvent>(envelope: &EventEnvelope<E>) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(envelope).map_err(|e| EncodeError(e.to_string()))
}

pub fn decode<E: IntegrationEvent>(bytes: &[u8]) -> Result<EventEnvelope<E>, DecodeError> {
    let raw: EventEnvelope<JsonValue> =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if raw.schema_version() != SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            found: raw.schema_version(),
            supported: SCHEMA_VERSION,
        });
    }

    if raw.event_type() != E::EVENT_TYPE {
        return Err(DecodeError::UnexpectedType {
            expected: E::EVENT_TYPE,
            found: raw.event_type().to_string(),
        });
    }

    let payload: E = serde_json::from_value(raw.payload().clone())
        .map_err(|e| DecodeError::InvalidPayload(e.to_string()))?;

    if payload.partition_key() != raw.partition_key() {
        return Err(DecodeError::InvalidPayload(format!(
            "partition key {:?} does not match company id {}",
            raw.partition_key(),
            payload.company_id()
        )));
    }

    Ok(raw.with_payload(payload))
}
