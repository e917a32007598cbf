//! Order service: records orders and their saga outcomes.
//!
//! `create_order` commits the order row and the `OrderCreated` outbox row
//! in one atomic unit; the reservation outcome later drives the order to
//! Confirmed or Cancelled through the same read-validate-write shape the
//! inventory side uses.

use std::time::Duration as StdDuration;

use chrono::Utc;
use common::{CustomerId, OrderId};
use domain::{Order, OrderCreated, OrderLine, OutboxEvent, ProcessedEvent, ReservationItem};
use store::{OrderStore, OrderTxn, OrderWrite};

use crate::error::OrderError;

/// Order service tuning knobs.
#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    /// Version-conflict retries before giving up with `Conflict`.
    pub max_retries: u32,

    /// Backoff between conflict retries, scaled by attempt.
    pub retry_backoff: StdDuration,
}

impl Default for OrderServiceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: StdDuration::from_millis(25),
        }
    }
}

/// Request to record a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
}

impl CreateOrder {
    /// Creates an order request.
    pub fn new(customer_id: CustomerId, lines: Vec<OrderLine>) -> Self {
        Self { customer_id, lines }
    }
}

/// Service for the order-taking side of the saga.
#[derive(Clone)]
pub struct OrderService<S> {
    store: S,
    config: OrderServiceConfig,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a service with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, OrderServiceConfig::default())
    }

    /// Creates a service with explicit configuration.
    pub fn with_config(store: S, config: OrderServiceConfig) -> Self {
        Self { store, config }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records a new Pending order together with its `OrderCreated` outbox
    /// row. The order id doubles as the saga correlation id.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order, OrderError> {
        if cmd.lines.is_empty() {
            return Err(OrderError::InvalidRequest(
                "order needs at least one line".to_string(),
            ));
        }
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidRequest(format!(
                    "zero quantity for {}",
                    line.product_id
                )));
            }
        }

        let order = Order::new(cmd.customer_id, cmd.lines, Utc::now());
        let event = OrderCreated {
            order_id: order.id(),
            customer_id: order.customer_id(),
            items: order
                .lines()
                .iter()
                .map(|line| ReservationItem::new(line.product_id.clone(), line.quantity))
                .collect(),
            total_amount: order.total_amount(),
        };
        let outbox = OutboxEvent::new(order.id().to_string(), &event, Some(order.id().as_uuid()))
            .map_err(store::StoreError::Serialization)?;

        self.store
            .commit(
                OrderTxn::new()
                    .with_order(OrderWrite::insert(order.clone()))
                    .with_outbox(outbox),
            )
            .await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id(), "order created");
        Ok(order)
    }

    /// Loads an order by id.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.store
            .order(id)
            .await?
            .ok_or(OrderError::NotFound(id))
    }

    /// Confirms an order after its items were reserved.
    pub async fn confirm_order(&self, id: OrderId) -> Result<(), OrderError> {
        self.confirm_order_recorded(id, None).await
    }

    /// Same as [`confirm_order`](Self::confirm_order), but also writes the
    /// consumer's processed-event marker in the same atomic unit.
    pub async fn confirm_order_recorded(
        &self,
        id: OrderId,
        receipt: Option<ProcessedEvent>,
    ) -> Result<(), OrderError> {
        self.transition(id, receipt, |order| {
            order.confirm(Utc::now())?;
            Ok(())
        })
        .await?;
        metrics::counter!("orders_confirmed_total").increment(1);
        tracing::info!(order_id = %id, "order confirmed");
        Ok(())
    }

    /// Cancels an order, recording why.
    pub async fn cancel_order(
        &self,
        id: OrderId,
        reason: impl Into<String>,
    ) -> Result<(), OrderError> {
        self.cancel_order_recorded(id, reason, None).await
    }

    /// Same as [`cancel_order`](Self::cancel_order), but also writes the
    /// consumer's processed-event marker in the same atomic unit.
    pub async fn cancel_order_recorded(
        &self,
        id: OrderId,
        reason: impl Into<String>,
        receipt: Option<ProcessedEvent>,
    ) -> Result<(), OrderError> {
        let reason = reason.into();
        self.transition(id, receipt, move |order| {
            order.cancel(reason.clone(), Utc::now())?;
            Ok(())
        })
        .await?;
        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(order_id = %id, "order cancelled");
        Ok(())
    }

    /// Read-validate-write loop shared by the two transitions, retried on
    /// version conflicts up to the configured bound.
    async fn transition<F>(
        &self,
        id: OrderId,
        receipt: Option<ProcessedEvent>,
        mutate: F,
    ) -> Result<(), OrderError>
    where
        F: Fn(&mut Order) -> Result<(), OrderError>,
    {
        let mut attempt = 0u32;
        loop {
            let mut order = self
                .store
                .order(id)
                .await?
                .ok_or(OrderError::NotFound(id))?;
            let read_version = order.version();
            mutate(&mut order)?;

            let mut txn = OrderTxn::new().with_order(OrderWrite::update(order, read_version));
            if let Some(receipt) = receipt.clone() {
                txn = txn.with_processed(receipt);
            }
            match self.store.commit(txn).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(OrderError::Conflict(self.config.max_retries));
                    }
                    tracing::debug!(order_id = %id, attempt, "order version conflict, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::OrderStatus;
    use store::InMemoryOrderStore;

    fn lines() -> Vec<OrderLine> {
        vec![
            OrderLine::new("SKU-001", 2, Money::from_cents(1000)),
            OrderLine::new("SKU-002", 1, Money::from_cents(2500)),
        ]
    }

    #[tokio::test]
    async fn create_order_commits_row_and_outbox_together() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(store.clone());

        let order = service
            .create_order(CreateOrder::new(CustomerId::new(), lines()))
            .await
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_amount(), Money::from_cents(4500));

        let outbox = store.outbox_events().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "OrderCreated");
        assert_eq!(outbox[0].correlation_id, Some(order.id().as_uuid()));

        let event: OrderCreated = serde_json::from_value(outbox[0].payload.clone()).unwrap();
        assert_eq!(event.order_id, order.id());
        assert_eq!(event.items.len(), 2);
        assert_eq!(event.items[0].quantity, 2);
    }

    #[tokio::test]
    async fn create_order_rejects_empty_and_zero_quantity() {
        let service = OrderService::new(InMemoryOrderStore::new());

        let empty = service
            .create_order(CreateOrder::new(CustomerId::new(), vec![]))
            .await;
        assert!(matches!(empty, Err(OrderError::InvalidRequest(_))));

        let zero = service
            .create_order(CreateOrder::new(
                CustomerId::new(),
                vec![OrderLine::new("SKU-001", 0, Money::from_cents(100))],
            ))
            .await;
        assert!(matches!(zero, Err(OrderError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn confirm_and_cancel_transitions() {
        let service = OrderService::new(InMemoryOrderStore::new());

        let confirmed = service
            .create_order(CreateOrder::new(CustomerId::new(), lines()))
            .await
            .unwrap();
        service.confirm_order(confirmed.id()).await.unwrap();
        let loaded = service.get_order(confirmed.id()).await.unwrap();
        assert_eq!(loaded.status(), OrderStatus::Confirmed);

        let cancelled = service
            .create_order(CreateOrder::new(CustomerId::new(), lines()))
            .await
            .unwrap();
        service
            .cancel_order(cancelled.id(), "insufficient stock")
            .await
            .unwrap();
        let loaded = service.get_order(cancelled.id()).await.unwrap();
        assert_eq!(loaded.status(), OrderStatus::Cancelled);
        assert_eq!(loaded.cancel_reason(), Some("insufficient stock"));

        // Terminal orders reject further transitions.
        let err = service.confirm_order(cancelled.id()).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidState(_)));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let service = OrderService::new(InMemoryOrderStore::new());
        let result = service.get_order(OrderId::new()).await;
        assert!(matches!(result, Err(OrderError::NotFound(_))));
        let result = service.confirm_order(OrderId::new()).await;
        assert!(matches!(result, Err(OrderError::NotFound(_))));
    }
}
