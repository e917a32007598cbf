//! Saga handler: reacts to `OrderCreated` by attempting a reservation.

use async_trait::async_trait;
use domain::{OrderCreated, ProcessedEvent, events};
use messaging::{EventEnvelope, EventHandler, HandlerError};
use store::{InventoryStore, StoreError};

use crate::error::ReservationError;
use crate::service::{CreateReservation, ReservationService};

/// Inventory-side consumer of the `orders` topic.
///
/// Success commits the reservation, the `ItemsReserved` outbox row and the
/// processed-event marker in one unit; a business failure commits a
/// `ReservationFailed` row with the marker instead. Transient failures
/// leave no marker so the broker redelivers.
pub struct OrderCreatedHandler<S> {
    service: ReservationService<S>,
}

impl<S: InventoryStore> OrderCreatedHandler<S> {
    /// Wraps a reservation service.
    pub fn new(service: ReservationService<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler for OrderCreatedHandler<S> {
    fn name(&self) -> &'static str {
        "inventory-order-created"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != events::ORDER_CREATED {
            return Err(HandlerError::Permanent(format!(
                "unexpected event type {} on orders topic",
                envelope.event_type
            )));
        }
        let event: OrderCreated = envelope
            .decode()
            .map_err(|e| HandlerError::Permanent(format!("malformed OrderCreated: {e}")))?;

        let receipt = ProcessedEvent::new(envelope.event_id, envelope.event_type.clone());
        let correlation_id = envelope
            .correlation_id
            .or_else(|| Some(event.order_id.as_uuid()));

        let cmd = CreateReservation {
            order_id: event.order_id,
            items: event.items.clone(),
            ttl_minutes: None,
            correlation_id,
        };

        match self
            .service
            .create_reservation_recorded(cmd, Some(receipt.clone()))
            .await
        {
            Ok(_) => Ok(()),

            // Business rejections settle the saga with a failure event;
            // the marker still commits so redeliveries are no-ops.
            Err(ReservationError::InsufficientStock(shortfalls)) => self
                .record_failure(
                    &event,
                    "insufficient stock".to_string(),
                    shortfalls,
                    receipt,
                    correlation_id,
                )
                .await,
            Err(ReservationError::ProductNotFound(product_id)) => self
                .record_failure(
                    &event,
                    format!("product not found: {product_id}"),
                    vec![],
                    receipt,
                    correlation_id,
                )
                .await,
            Err(ReservationError::InvalidRequest(reason)) => self
                .record_failure(&event, reason, vec![], receipt, correlation_id)
                .await,

            // A concurrent duplicate already committed the marker.
            Err(ReservationError::Store(StoreError::DuplicateEvent(_))) => Ok(()),

            // Conflicts and store trouble are transient: redeliver and
            // retry the whole request.
            Err(ReservationError::Conflict(retries)) => Err(HandlerError::Transient(format!(
                "reservation conflict after {retries} retries"
            ))),
            Err(ReservationError::Store(err)) => Err(HandlerError::from_store(err)),

            Err(other) => Err(HandlerError::Permanent(other.to_string())),
        }
    }
}

impl<S: InventoryStore> OrderCreatedHandler<S> {
    async fn record_failure(
        &self,
        event: &OrderCreated,
        reason: String,
        shortfalls: Vec<domain::StockShortfall>,
        receipt: ProcessedEvent,
        correlation_id: Option<uuid::Uuid>,
    ) -> Result<(), HandlerError> {
        match self
            .service
            .record_reservation_failure(
                event.order_id,
                reason,
                shortfalls,
                Some(receipt),
                correlation_id,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(ReservationError::Store(StoreError::DuplicateEvent(_))) => Ok(()),
            Err(ReservationError::Store(err)) => Err(HandlerError::from_store(err)),
            Err(other) => Err(HandlerError::Permanent(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, Money, OrderId};
    use domain::{OutboxEvent, ReservationFailed, ReservationItem};
    use messaging::EventEnvelope;
    use store::{InMemoryInventoryStore, ProcessedEventStore};

    fn order_created_envelope(order_id: OrderId, items: Vec<ReservationItem>) -> EventEnvelope {
        let event = OrderCreated {
            order_id,
            customer_id: CustomerId::new(),
            items,
            total_amount: Money::from_cents(1000),
        };
        let row = OutboxEvent::new(order_id.to_string(), &event, Some(order_id.as_uuid())).unwrap();
        EventEnvelope::from_outbox(&row)
    }

    async fn handler_with_stock(
        levels: &[(&str, u32)],
    ) -> (InMemoryInventoryStore, OrderCreatedHandler<InMemoryInventoryStore>) {
        let store = InMemoryInventoryStore::new();
        let service = ReservationService::new(store.clone());
        for (sku, quantity) in levels {
            service
                .restock(&common::ProductId::new(*sku), *quantity)
                .await
                .unwrap();
        }
        (store, OrderCreatedHandler::new(service))
    }

    #[tokio::test]
    async fn order_created_reserves_and_marks_processed() {
        let (store, handler) = handler_with_stock(&[("P1", 10)]).await;
        let envelope =
            order_created_envelope(OrderId::new(), vec![ReservationItem::new("P1", 4)]);

        handler.handle(&envelope).await.unwrap();

        assert!(store.is_processed(envelope.event_id).await.unwrap());
        assert_eq!(store.reservation_count().await, 1);
        let outbox = store.outbox_events().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "ItemsReserved");
        assert_eq!(outbox[0].correlation_id, envelope.correlation_id);
    }

    #[tokio::test]
    async fn shortfall_records_reservation_failed_with_detail() {
        let (store, handler) = handler_with_stock(&[("P1", 2)]).await;
        let order_id = OrderId::new();
        let envelope = order_created_envelope(order_id, vec![ReservationItem::new("P1", 5)]);

        handler.handle(&envelope).await.unwrap();

        assert!(store.is_processed(envelope.event_id).await.unwrap());
        assert_eq!(store.reservation_count().await, 0);

        let outbox = store.outbox_events().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "ReservationFailed");
        let failure: ReservationFailed =
            serde_json::from_value(outbox[0].payload.clone()).unwrap();
        assert_eq!(failure.order_id, order_id);
        assert_eq!(failure.unavailable_items.len(), 1);
        assert_eq!(failure.unavailable_items[0].requested, 5);
        assert_eq!(failure.unavailable_items[0].available, 2);
    }

    #[tokio::test]
    async fn unknown_product_records_reservation_failed() {
        let (store, handler) = handler_with_stock(&[]).await;
        let envelope =
            order_created_envelope(OrderId::new(), vec![ReservationItem::new("GHOST", 1)]);

        handler.handle(&envelope).await.unwrap();

        let outbox = store.outbox_events().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "ReservationFailed");
    }

    #[tokio::test]
    async fn wrong_event_type_is_permanent() {
        let (_store, handler) = handler_with_stock(&[]).await;
        let mut envelope = order_created_envelope(OrderId::new(), vec![]);
        envelope.event_type = "SomethingElse".to_string();

        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }
}
