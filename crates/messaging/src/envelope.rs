//! The wire envelope shared by outbox and consumer.

use chrono::{DateTime, Utc};
use common::EventId;
use domain::OutboxEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping a domain event payload on the bus.
///
/// `event_id` is carried over from the outbox row and is the idempotency
/// key on the consuming side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: String,
    pub event_timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Builds the envelope for an outbox row.
    pub fn from_outbox(event: &OutboxEvent) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type.clone(),
            event_timestamp: event.created_at,
            correlation_id: event.correlation_id,
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
        }
    }

    /// Deserializes the payload into a concrete event type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
