use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ProductId, ReservationId};
use domain::{Order, OutboxEvent, Reservation, StockLedgerEntry};

use crate::txn::{InventoryTxn, OrderTxn};
use crate::Result;

/// Durable storage for the inventory service: stock ledger, reservations,
/// and the service's own outbox/processed-event rows.
///
/// All writes go through [`commit`](InventoryStore::commit), which applies
/// the whole transaction atomically. Every row carries a version column;
/// the commit fails with `VersionConflict` if any expectation no longer
/// holds, and the caller re-runs its read-validate-write sequence.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Loads one ledger entry.
    async fn ledger_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>>;

    /// Loads ledger entries for several products in one batch.
    ///
    /// Missing products are simply absent from the result; the caller
    /// decides whether that is an error.
    async fn ledger_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>>;

    /// Loads a reservation by id.
    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// Returns Pending reservations whose hold window elapsed before
    /// `as_of`, oldest first, capped at `limit`.
    async fn expired_pending_reservations(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    /// Atomically applies a write unit, or nothing on any failure.
    async fn commit(&self, txn: InventoryTxn) -> Result<()>;
}

/// Durable storage for the order service: orders plus the service's own
/// outbox/processed-event rows.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads an order by id.
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Atomically applies a write unit, or nothing on any failure.
    async fn commit(&self, txn: OrderTxn) -> Result<()>;
}

/// Outbox polling surface used by the publisher. Each service's store
/// exposes its own outbox through this trait.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Returns rows awaiting publication (Pending, or Failed below the
    /// retry ceiling), ordered by creation time, capped at `limit`.
    async fn publishable_events(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEvent>>;

    /// Marks a row as delivered.
    async fn mark_published(&self, id: EventId) -> Result<()>;

    /// Marks a row as failed and increments its retry count.
    async fn mark_failed(&self, id: EventId) -> Result<()>;

    /// Number of rows stuck at the retry ceiling, for operator attention.
    async fn exhausted_events(&self, max_retries: u32) -> Result<u64>;
}

/// Idempotency-ledger lookup used by consumers before handling a delivery.
///
/// The marker row itself is written through the service's `commit`, inside
/// the same transaction as the handler's business effects.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// True if an event with this id has already been handled.
    async fn is_processed(&self, event_id: EventId) -> Result<bool>;
}
