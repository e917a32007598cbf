//! In-memory store implementations for testing and single-process runs.
//!
//! These keep the same commit semantics as the PostgreSQL implementations:
//! all expectations are validated before anything is applied, so a failed
//! commit leaves every table untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ProductId, ReservationId};
use domain::{
    Order, OutboxEvent, OutboxStatus, ProcessedEvent, Reservation, ReservationStatus,
    StockLedgerEntry,
};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::store::{InventoryStore, OrderStore, OutboxStore, ProcessedEventStore};
use crate::txn::{Expected, InventoryTxn, OrderTxn};

fn check_expectation(
    entity: &'static str,
    id: String,
    current: Option<common::Version>,
    expected: Expected,
) -> Result<()> {
    match (expected, current) {
        (Expected::Absent, None) => Ok(()),
        (Expected::Absent, Some(_)) => Err(StoreError::DuplicateRow { entity, id }),
        (Expected::Version(_), None) => Err(StoreError::RowMissing { entity, id }),
        (Expected::Version(expected), Some(actual)) if actual == expected => Ok(()),
        (Expected::Version(expected), Some(actual)) => {
            metrics::counter!("store_version_conflicts_total").increment(1);
            tracing::debug!(entity, %id, %expected, %actual, "version conflict");
            Err(StoreError::VersionConflict {
                entity,
                id,
                expected,
                actual,
            })
        }
    }
}

fn publishable(outbox: &[OutboxEvent], limit: usize, max_retries: u32) -> Vec<OutboxEvent> {
    let mut rows: Vec<OutboxEvent> = outbox
        .iter()
        .filter(|e| e.status != OutboxStatus::Published && e.retry_count < max_retries)
        .cloned()
        .collect();
    rows.sort_by_key(|e| e.created_at);
    rows.truncate(limit);
    rows
}

fn find_outbox_mut(outbox: &mut [OutboxEvent], id: EventId) -> Result<&mut OutboxEvent> {
    outbox
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or(StoreError::RowMissing {
            entity: "outbox event",
            id: id.to_string(),
        })
}

#[derive(Default)]
struct InventoryTables {
    ledger: HashMap<ProductId, StockLedgerEntry>,
    reservations: HashMap<ReservationId, Reservation>,
    outbox: Vec<OutboxEvent>,
    processed: HashMap<EventId, ProcessedEvent>,
}

impl InventoryTables {
    fn validate(&self, txn: &InventoryTxn) -> Result<()> {
        for write in &txn.ledger {
            let id = write.entry.product_id().clone();
            let current = self.ledger.get(&id).map(|e| e.version());
            check_expectation("ledger entry", id.to_string(), current, write.expected)?;
        }
        if let Some(write) = &txn.reservation {
            let id = write.reservation.id();
            let current = self.reservations.get(&id).map(|r| r.version());
            check_expectation("reservation", id.to_string(), current, write.expected)?;
        }
        for event in &txn.outbox {
            if self.outbox.iter().any(|e| e.id == event.id) {
                return Err(StoreError::DuplicateEvent(event.id));
            }
        }
        if let Some(marker) = &txn.processed
            && self.processed.contains_key(&marker.event_id)
        {
            return Err(StoreError::DuplicateEvent(marker.event_id));
        }
        Ok(())
    }

    fn apply(&mut self, txn: InventoryTxn) {
        for write in txn.ledger {
            self.ledger
                .insert(write.entry.product_id().clone(), write.entry);
        }
        if let Some(write) = txn.reservation {
            self.reservations
                .insert(write.reservation.id(), write.reservation);
        }
        self.outbox.extend(txn.outbox);
        if let Some(marker) = txn.processed {
            self.processed.insert(marker.event_id, marker);
        }
    }
}

/// In-memory inventory store.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    tables: Arc<RwLock<InventoryTables>>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every outbox row, for test inspection.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.tables.read().await.outbox.clone()
    }

    /// Returns the number of stored reservations.
    pub async fn reservation_count(&self) -> usize {
        self.tables.read().await.reservations.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        *tables = InventoryTables::default();
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn ledger_entry(&self, product_id: &ProductId) -> Result<Option<StockLedgerEntry>> {
        Ok(self.tables.read().await.ledger.get(product_id).cloned())
    }

    async fn ledger_entries(&self, product_ids: &[ProductId]) -> Result<Vec<StockLedgerEntry>> {
        let tables = self.tables.read().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| tables.ledger.get(id).cloned())
            .collect())
    }

    async fn reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self.tables.read().await.reservations.get(&id).cloned())
    }

    async fn expired_pending_reservations(
        &self,
        as_of: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let tables = self.tables.read().await;
        let mut expired: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.status() == ReservationStatus::Pending && r.expires_at() < as_of)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.expires_at());
        expired.truncate(limit);
        Ok(expired)
    }

    async fn commit(&self, txn: InventoryTxn) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.validate(&txn)?;
        tables.apply(txn);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryInventoryStore {
    async fn publishable_events(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEvent>> {
        Ok(publishable(
            &self.tables.read().await.outbox,
            limit,
            max_retries,
        ))
    }

    async fn mark_published(&self, id: EventId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = find_outbox_mut(&mut tables.outbox, id)?;
        event.status = OutboxStatus::Published;
        Ok(())
    }

    async fn mark_failed(&self, id: EventId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = find_outbox_mut(&mut tables.outbox, id)?;
        event.status = OutboxStatus::Failed;
        event.retry_count += 1;
        Ok(())
    }

    async fn exhausted_events(&self, max_retries: u32) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed && e.retry_count >= max_retries)
            .count() as u64)
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryInventoryStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        Ok(self.tables.read().await.processed.contains_key(&event_id))
    }
}

#[derive(Default)]
struct OrderTables {
    orders: HashMap<OrderId, Order>,
    outbox: Vec<OutboxEvent>,
    processed: HashMap<EventId, ProcessedEvent>,
}

impl OrderTables {
    fn validate(&self, txn: &OrderTxn) -> Result<()> {
        if let Some(write) = &txn.order {
            let id = write.order.id();
            let current = self.orders.get(&id).map(|o| o.version());
            check_expectation("order", id.to_string(), current, write.expected)?;
        }
        for event in &txn.outbox {
            if self.outbox.iter().any(|e| e.id == event.id) {
                return Err(StoreError::DuplicateEvent(event.id));
            }
        }
        if let Some(marker) = &txn.processed
            && self.processed.contains_key(&marker.event_id)
        {
            return Err(StoreError::DuplicateEvent(marker.event_id));
        }
        Ok(())
    }

    fn apply(&mut self, txn: OrderTxn) {
        if let Some(write) = txn.order {
            self.orders.insert(write.order.id(), write.order);
        }
        self.outbox.extend(txn.outbox);
        if let Some(marker) = txn.processed {
            self.processed.insert(marker.event_id, marker);
        }
    }
}

/// In-memory order store.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<OrderTables>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every outbox row, for test inspection.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.tables.read().await.outbox.clone()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn commit(&self, txn: OrderTxn) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.validate(&txn)?;
        tables.apply(txn);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOrderStore {
    async fn publishable_events(&self, limit: usize, max_retries: u32) -> Result<Vec<OutboxEvent>> {
        Ok(publishable(
            &self.tables.read().await.outbox,
            limit,
            max_retries,
        ))
    }

    async fn mark_published(&self, id: EventId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = find_outbox_mut(&mut tables.outbox, id)?;
        event.status = OutboxStatus::Published;
        Ok(())
    }

    async fn mark_failed(&self, id: EventId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let event = find_outbox_mut(&mut tables.outbox, id)?;
        event.status = OutboxStatus::Failed;
        event.retry_count += 1;
        Ok(())
    }

    async fn exhausted_events(&self, max_retries: u32) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Failed && e.retry_count >= max_retries)
            .count() as u64)
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryOrderStore {
    async fn is_processed(&self, event_id: EventId) -> Result<bool> {
        Ok(self.tables.read().await.processed.contains_key(&event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{LedgerWrite, ReservationWrite};
    use chrono::Duration;
    use domain::{DomainEvent, ItemsReserved, ReservationItem};

    fn entry(sku: &str, available: u32) -> StockLedgerEntry {
        StockLedgerEntry::new(ProductId::new(sku), available)
    }

    fn pending_reservation(ttl_minutes: i64) -> Reservation {
        Reservation::new(
            OrderId::new(),
            vec![ReservationItem::new("SKU-001", 4)],
            Utc::now(),
            Duration::minutes(ttl_minutes),
        )
    }

    fn outbox_row() -> OutboxEvent {
        let event = ItemsReserved {
            reservation_id: ReservationId::new(),
            order_id: OrderId::new(),
            items: vec![],
        };
        OutboxEvent::new("agg", &event, None).unwrap()
    }

    #[tokio::test]
    async fn insert_and_read_ledger_entry() {
        let store = InMemoryInventoryStore::new();
        let txn = InventoryTxn::new().with_ledger(LedgerWrite::insert(entry("SKU-001", 10)));
        store.commit(txn).await.unwrap();

        let loaded = store
            .ledger_entry(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.available(), 10);
    }

    #[tokio::test]
    async fn insert_of_existing_entry_is_rejected() {
        let store = InMemoryInventoryStore::new();
        store
            .commit(InventoryTxn::new().with_ledger(LedgerWrite::insert(entry("SKU-001", 10))))
            .await
            .unwrap();

        let result = store
            .commit(InventoryTxn::new().with_ledger(LedgerWrite::insert(entry("SKU-001", 5))))
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateRow { .. })));
    }

    #[tokio::test]
    async fn stale_version_update_conflicts() {
        let store = InMemoryInventoryStore::new();
        store
            .commit(InventoryTxn::new().with_ledger(LedgerWrite::insert(entry("SKU-001", 10))))
            .await
            .unwrap();

        // Two writers read the same version.
        let read = store
            .ledger_entry(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();

        let mut first = read.clone();
        first.reserve(4).unwrap();
        store
            .commit(InventoryTxn::new().with_ledger(LedgerWrite::update(first, read.version())))
            .await
            .unwrap();

        let mut second = read.clone();
        second.reserve(8).unwrap();
        let result = store
            .commit(InventoryTxn::new().with_ledger(LedgerWrite::update(second, read.version())))
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

        // The losing writer changed nothing.
        let current = store
            .ledger_entry(&ProductId::new("SKU-001"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.available(), 6);
        assert_eq!(current.reserved(), 4);
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = InMemoryInventoryStore::new();
        let marker = ProcessedEvent::new(EventId::new(), "ItemsReserved");
        store
            .commit(InventoryTxn::new().with_processed(marker.clone()))
            .await
            .unwrap();

        // Valid ledger insert bundled with a duplicate marker: the whole
        // unit must be rejected, including the ledger insert.
        let result = store
            .commit(
                InventoryTxn::new()
                    .with_ledger(LedgerWrite::insert(entry("SKU-009", 3)))
                    .with_processed(marker),
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateEvent(_))));
        assert!(store
            .ledger_entry(&ProductId::new("SKU-009"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_pending_query_filters_and_sorts() {
        let store = InMemoryInventoryStore::new();

        let fresh = pending_reservation(30);
        let old_a = pending_reservation(-10);
        let old_b = pending_reservation(-5);
        let mut settled = pending_reservation(-20);
        settled.cancel().unwrap();

        for r in [&fresh, &old_a, &old_b, &settled] {
            store
                .commit(InventoryTxn::new().with_reservation(ReservationWrite::insert(r.clone())))
                .await
                .unwrap();
        }

        let expired = store
            .expired_pending_reservations(Utc::now(), 10)
            .await
            .unwrap();
        let ids: Vec<ReservationId> = expired.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![old_a.id(), old_b.id()]);
    }

    #[tokio::test]
    async fn outbox_lifecycle() {
        let store = InMemoryInventoryStore::new();
        let row = outbox_row();
        let id = row.id;
        store
            .commit(InventoryTxn::new().with_outbox(row))
            .await
            .unwrap();

        let publishable = store.publishable_events(10, 5).await.unwrap();
        assert_eq!(publishable.len(), 1);
        assert_eq!(publishable[0].event_type, "ItemsReserved");

        store.mark_failed(id).await.unwrap();
        let after_failure = store.publishable_events(10, 5).await.unwrap();
        assert_eq!(after_failure.len(), 1);
        assert_eq!(after_failure[0].retry_count, 1);

        store.mark_published(id).await.unwrap();
        assert!(store.publishable_events(10, 5).await.unwrap().is_empty());
        assert_eq!(store.exhausted_events(5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_ceiling_removes_from_publishable_and_counts_exhausted() {
        let store = InMemoryInventoryStore::new();
        let row = outbox_row();
        let id = row.id;
        store
            .commit(InventoryTxn::new().with_outbox(row))
            .await
            .unwrap();

        for _ in 0..3 {
            store.mark_failed(id).await.unwrap();
        }
        assert!(store.publishable_events(10, 3).await.unwrap().is_empty());
        assert_eq!(store.exhausted_events(3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn processed_marker_dedupes() {
        let store = InMemoryInventoryStore::new();
        let event_id = EventId::new();
        assert!(!store.is_processed(event_id).await.unwrap());

        store
            .commit(
                InventoryTxn::new().with_processed(ProcessedEvent::new(event_id, "OrderCreated")),
            )
            .await
            .unwrap();
        assert!(store.is_processed(event_id).await.unwrap());

        let result = store
            .commit(
                InventoryTxn::new().with_processed(ProcessedEvent::new(event_id, "OrderCreated")),
            )
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateEvent(id)) if id == event_id));
    }

    #[tokio::test]
    async fn order_store_commit_and_read() {
        let store = InMemoryOrderStore::new();
        let order = Order::new(common::CustomerId::new(), vec![], Utc::now());
        let id = order.id();

        store
            .commit(OrderTxn::new().with_order(crate::txn::OrderWrite::insert(order)))
            .await
            .unwrap();

        let loaded = store.order(id).await.unwrap().unwrap();
        assert_eq!(loaded.id(), id);
        assert_eq!(store.order_count().await, 1);

        // Stale CAS on the order row.
        let mut stale = loaded.clone();
        let read_version = stale.version();
        stale.confirm(Utc::now()).unwrap();
        store
            .commit(
                OrderTxn::new().with_order(crate::txn::OrderWrite::update(
                    stale.clone(),
                    read_version,
                )),
            )
            .await
            .unwrap();

        let mut second = loaded.clone();
        second.cancel("late", Utc::now()).unwrap();
        let result = store
            .commit(OrderTxn::new().with_order(crate::txn::OrderWrite::update(
                second,
                read_version,
            )))
            .await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
    }
}
