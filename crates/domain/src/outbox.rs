//! Durable outbox and processed-event rows.

use chrono::{DateTime, Utc};
use common::EventId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::DomainEvent;

/// Publication status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutboxStatus {
    /// Waiting for the publisher.
    #[default]
    Pending,

    /// Delivered to the message bus.
    Published,

    /// Last delivery attempt failed; retried on a later cycle until the
    /// retry ceiling.
    Failed,
}

impl OutboxStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "Pending",
            OutboxStatus::Published => "Published",
            OutboxStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a fact to be published.
///
/// Rows are inserted only inside the same store transaction as the business
/// mutation they report; after that, only the publisher touches them
/// (status and retry count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Event identity; the downstream idempotency key.
    pub id: EventId,

    /// Id of the aggregate the fact is about (order or reservation id).
    pub aggregate_id: String,

    /// Wire name of the payload type.
    pub event_type: String,

    /// Correlates all events of one saga run.
    pub correlation_id: Option<Uuid>,

    /// The serialized payload.
    pub payload: serde_json::Value,

    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl OutboxEvent {
    /// Creates a pending outbox row for `event`.
    pub fn new<E: DomainEvent + Serialize>(
        aggregate_id: impl Into<String>,
        event: &E,
        correlation_id: Option<Uuid>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: EventId::new(),
            aggregate_id: aggregate_id.into(),
            event_type: event.event_type().to_string(),
            correlation_id,
            payload: serde_json::to_value(event)?,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            retry_count: 0,
        })
    }
}

/// Idempotency ledger row on the consuming side.
///
/// Existence of a row with a given `event_id` is the sole gate against
/// re-processing a redelivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Records an event as processed now.
    pub fn new(event_id: EventId, event_type: impl Into<String>) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            processed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OrderCreated;
    use common::{CustomerId, Money, OrderId};

    #[test]
    fn new_outbox_row_is_pending_with_zero_retries() {
        let order_id = OrderId::new();
        let event = OrderCreated {
            order_id,
            customer_id: CustomerId::new(),
            items: vec![],
            total_amount: Money::from_cents(100),
        };
        let row = OutboxEvent::new(order_id.to_string(), &event, None).unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.event_type, "OrderCreated");
        assert_eq!(row.aggregate_id, order_id.to_string());
    }
}
