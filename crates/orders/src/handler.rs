//! Saga handlers: react to the inventory side's reservation outcome.

use async_trait::async_trait;
use domain::{ItemsReserved, ProcessedEvent, ReservationFailed, events};
use messaging::{EventEnvelope, EventHandler, HandlerError};
use store::{OrderStore, StoreError};

use crate::error::OrderError;
use crate::service::OrderService;

/// Order-side consumer of the `inventory` topic.
///
/// `ItemsReserved` confirms the order, `ReservationFailed` cancels it; in
/// both cases the transition and the processed-event marker commit in one
/// unit. An order already settled the other way is a genuine anomaly and
/// goes to the dead-letter queue rather than being quietly absorbed.
pub struct ReservationOutcomeHandler<S> {
    service: OrderService<S>,
}

impl<S: OrderStore> ReservationOutcomeHandler<S> {
    /// Wraps an order service.
    pub fn new(service: OrderService<S>) -> Self {
        Self { service }
    }

    fn map_result(result: Result<(), OrderError>) -> Result<(), HandlerError> {
        match result {
            Ok(()) => Ok(()),

            // A concurrent duplicate already committed the marker.
            Err(OrderError::Store(StoreError::DuplicateEvent(_))) => Ok(()),

            // The order row may trail the event on a fresh replica; let the
            // broker redeliver until the ceiling.
            Err(OrderError::NotFound(id)) => {
                Err(HandlerError::Transient(format!("order {id} not yet visible")))
            }

            Err(OrderError::Conflict(retries)) => Err(HandlerError::Transient(format!(
                "order conflict after {retries} retries"
            ))),
            Err(OrderError::Store(err)) => Err(HandlerError::from_store(err)),

            Err(other) => Err(HandlerError::Permanent(other.to_string())),
        }
    }
}

#[async_trait]
impl<S: OrderStore> EventHandler for ReservationOutcomeHandler<S> {
    fn name(&self) -> &'static str {
        "orders-reservation-outcome"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let receipt = ProcessedEvent::new(envelope.event_id, envelope.event_type.clone());

        match envelope.event_type.as_str() {
            events::ITEMS_RESERVED => {
                let event: ItemsReserved = envelope
                    .decode()
                    .map_err(|e| HandlerError::Permanent(format!("malformed ItemsReserved: {e}")))?;
                Self::map_result(
                    self.service
                        .confirm_order_recorded(event.order_id, Some(receipt))
                        .await,
                )
            }
            events::RESERVATION_FAILED => {
                let event: ReservationFailed = envelope.decode().map_err(|e| {
                    HandlerError::Permanent(format!("malformed ReservationFailed: {e}"))
                })?;
                Self::map_result(
                    self.service
                        .cancel_order_recorded(event.order_id, event.reason.clone(), Some(receipt))
                        .await,
                )
            }
            other => Err(HandlerError::Permanent(format!(
                "unexpected event type {other} on inventory topic"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CustomerId, Money, OrderId, ReservationId};
    use domain::{OrderLine, OrderStatus, OutboxEvent, ReservationItem, StockShortfall};
    use store::{InMemoryOrderStore, ProcessedEventStore};

    use crate::service::CreateOrder;

    async fn setup() -> (
        InMemoryOrderStore,
        OrderService<InMemoryOrderStore>,
        ReservationOutcomeHandler<InMemoryOrderStore>,
    ) {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(store.clone());
        let handler = ReservationOutcomeHandler::new(service.clone());
        (store, service, handler)
    }

    async fn pending_order(service: &OrderService<InMemoryOrderStore>) -> OrderId {
        service
            .create_order(CreateOrder::new(
                CustomerId::new(),
                vec![OrderLine::new("SKU-001", 2, Money::from_cents(1000))],
            ))
            .await
            .unwrap()
            .id()
    }

    fn items_reserved_envelope(order_id: OrderId) -> EventEnvelope {
        let event = ItemsReserved {
            reservation_id: ReservationId::new(),
            order_id,
            items: vec![ReservationItem::new("SKU-001", 2)],
        };
        let row = OutboxEvent::new(
            ReservationId::new().to_string(),
            &event,
            Some(order_id.as_uuid()),
        )
        .unwrap();
        EventEnvelope::from_outbox(&row)
    }

    fn reservation_failed_envelope(order_id: OrderId) -> EventEnvelope {
        let event = ReservationFailed {
            order_id,
            reason: "insufficient stock".to_string(),
            unavailable_items: vec![StockShortfall {
                product_id: common::ProductId::new("SKU-001"),
                requested: 2,
                available: 1,
            }],
        };
        let row = OutboxEvent::new(order_id.to_string(), &event, Some(order_id.as_uuid())).unwrap();
        EventEnvelope::from_outbox(&row)
    }

    #[tokio::test]
    async fn items_reserved_confirms_order_and_marks_processed() {
        let (store, service, handler) = setup().await;
        let order_id = pending_order(&service).await;
        let envelope = items_reserved_envelope(order_id);

        handler.handle(&envelope).await.unwrap();

        assert!(store.is_processed(envelope.event_id).await.unwrap());
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn reservation_failed_cancels_order_with_reason() {
        let (store, service, handler) = setup().await;
        let order_id = pending_order(&service).await;
        let envelope = reservation_failed_envelope(order_id);

        handler.handle(&envelope).await.unwrap();

        assert!(store.is_processed(envelope.event_id).await.unwrap());
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancel_reason(), Some("insufficient stock"));
    }

    #[tokio::test]
    async fn conflicting_outcome_on_settled_order_is_permanent() {
        let (_store, service, handler) = setup().await;
        let order_id = pending_order(&service).await;
        handler
            .handle(&items_reserved_envelope(order_id))
            .await
            .unwrap();

        // A failure outcome for an already-confirmed order cannot be
        // absorbed; it must surface for inspection.
        let err = handler
            .handle(&reservation_failed_envelope(order_id))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }

    #[tokio::test]
    async fn unknown_order_is_transient() {
        let (_store, _service, handler) = setup().await;
        let err = handler
            .handle(&items_reserved_envelope(OrderId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Transient(_)));
    }

    #[tokio::test]
    async fn wrong_event_type_is_permanent() {
        let (_store, service, handler) = setup().await;
        let order_id = pending_order(&service).await;
        let mut envelope = items_reserved_envelope(order_id);
        envelope.event_type = "SomethingElse".to_string();

        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(_)));
    }
}
