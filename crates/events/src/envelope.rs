use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobboard_core::EventId;

use crate::contract::SCHEMA_VERSION;
use crate::event::IntegrationEvent;

/// Envelope for an integration event: the unit written to a topic.
///
/// Notes:
/// - **Versioned**: `schema_version` pins the wire format; decoders refuse unknown versions.
/// - **Keyed**: `partition_key` is the company id, which is what keeps one company's
///   events in order on the bus.
/// - `payload` is the typed event (or raw JSON while it is being validated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<E> {
    schema_version: u32,
    event_id: EventId,
    event_type: String,
    partition_key: String,
    producer: String,

    /// Business time of the change carried in `payload`.
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E: IntegrationEvent> EventEnvelope<E> {
    /// Wrap a typed event, stamping the current schema version and a fresh event id.
    pub fn wrap(producer: impl Into<String>, payload: E) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            event_id: EventId::new(),
            event_type: E::EVENT_TYPE.to_string(),
            partition_key: payload.partition_key(),
            producer: producer.into(),
            occurred_at: payload.occurred_at(),
            payload,
        }
    }
}

impl<E> EventEnvelope<E> {
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }

    /// Swap the payload, keeping the metadata (used when typing a raw JSON payload).
    pub(crate) fn with_payload<T>(self, payload: T) -> EventEnvelope<T> {
        EventEnvelope {
            schema_version: self.schema_version,
            event_id: self.event_id,
            event_type: self.event_type,
            partition_key: self.partition_key,
            producer: self.producer,
            occurred_at: self.occurred_at,
            payload,
        }
    }
}
