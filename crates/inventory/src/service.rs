//! Reservation orchestrator.
//!
//! Every operation is a short-lived read-validate-write sequence: load the
//! rows it needs, mutate them through the domain types, and commit one
//! store transaction whose version checks detect concurrent writers.
//! Conflicts are retried a bounded number of times with jittered backoff,
//! then surfaced as [`ReservationError::Conflict`].

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{OrderId, ProductId, ReservationId, Version};
use domain::{
    CancelOutcome, ItemsReserved, LedgerError, OutboxEvent, ProcessedEvent, Reservation,
    ReservationFailed, ReservationItem, StockLedgerEntry, StockShortfall,
};
use rand::Rng;
use store::{InventoryStore, InventoryTxn, LedgerWrite, ReservationWrite};
use uuid::Uuid;

use crate::error::ReservationError;

/// Shortest TTL a caller may request, in minutes.
pub const MIN_TTL_MINUTES: u32 = 1;

/// Longest TTL a caller may request, in minutes.
pub const MAX_TTL_MINUTES: u32 = 60;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// TTL applied when the request does not carry one.
    pub default_ttl_minutes: u32,

    /// Version-conflict retries before giving up with `Conflict`.
    pub max_retries: u32,

    /// Base backoff between conflict retries; jitter of up to one extra
    /// base is added per attempt.
    pub retry_backoff: StdDuration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_ttl_minutes: 15,
            max_retries: 3,
            retry_backoff: StdDuration::from_millis(25),
        }
    }
}

/// Request to hold stock for an order.
#[derive(Debug, Clone)]
pub struct CreateReservation {
    pub order_id: OrderId,
    pub items: Vec<ReservationItem>,

    /// Hold TTL in minutes; the service default applies when None.
    pub ttl_minutes: Option<u32>,

    /// Correlates the saga run across services.
    pub correlation_id: Option<Uuid>,
}

impl CreateReservation {
    /// Request with the default TTL and no correlation id.
    pub fn new(order_id: OrderId, items: Vec<ReservationItem>) -> Self {
        Self {
            order_id,
            items,
            ttl_minutes: None,
            correlation_id: None,
        }
    }
}

/// Point-in-time stock levels for one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub available: u32,
    pub reserved: u32,
    pub total: u32,
}

impl From<&StockLedgerEntry> for StockLevel {
    fn from(entry: &StockLedgerEntry) -> Self {
        Self {
            product_id: entry.product_id().clone(),
            available: entry.available(),
            reserved: entry.reserved(),
            total: entry.total(),
        }
    }
}

/// A reservation as stored, plus the honest expiry flag.
///
/// A Pending reservation past its window is reported as Pending with
/// `is_expired` set until the reaper processes it; the read path never
/// reinterprets it as not-found.
#[derive(Debug, Clone)]
pub struct ReservationView {
    pub reservation: Reservation,
    pub is_expired: bool,
}

/// Sums quantities per product, preserving first-occurrence order, so a
/// release path writes each ledger entry exactly once.
pub(crate) fn aggregate_quantities(items: &[ReservationItem]) -> Vec<(ProductId, u32)> {
    let mut totals: Vec<(ProductId, u32)> = Vec::new();
    for item in items {
        if let Some((_, quantity)) = totals.iter_mut().find(|(p, _)| p == &item.product_id) {
            *quantity += item.quantity;
        } else {
            totals.push((item.product_id.clone(), item.quantity));
        }
    }
    totals
}

/// Service for creating and settling reservations.
#[derive(Clone)]
pub struct ReservationService<S> {
    store: S,
    config: ServiceConfig,
}

impl<S: InventoryStore> ReservationService<S> {
    /// Creates a service with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ServiceConfig::default())
    }

    /// Creates a service with explicit configuration.
    pub fn with_config(store: S, config: ServiceConfig) -> Self {
        Self { store, config }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves stock for an order.
    ///
    /// All-or-nothing: a missing product or any shortfall rejects the whole
    /// request with the ledger untouched. On success the ledger mutations,
    /// the Pending reservation and the `ItemsReserved` outbox row commit in
    /// one atomic unit.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_reservation(
        &self,
        cmd: CreateReservation,
    ) -> Result<Reservation, ReservationError> {
        self.create_reservation_recorded(cmd, None).await
    }

    /// Same as [`create_reservation`](Self::create_reservation), but also
    /// writes the consumer's processed-event marker in the same atomic
    /// unit. Used by the saga handler so handling and marking cannot come
    /// apart.
    pub async fn create_reservation_recorded(
        &self,
        cmd: CreateReservation,
        receipt: Option<ProcessedEvent>,
    ) -> Result<Reservation, ReservationError> {
        let ttl = self.validate(&cmd)?;
        let mut attempt = 0u32;
        loop {
            match self.try_create(&cmd, ttl, receipt.clone()).await {
                Err(ReservationError::Store(err)) if err.is_retryable() => {
                    attempt += 1;
                    metrics::counter!("reservation_conflict_retries_total").increment(1);
                    if attempt > self.config.max_retries {
                        return Err(ReservationError::Conflict(self.config.max_retries));
                    }
                    tracing::debug!(attempt, "ledger version conflict, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Converts a pending hold into a firm allocation.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_reservation(&self, id: ReservationId) -> Result<(), ReservationError> {
        let mut attempt = 0u32;
        loop {
            match self.try_confirm(id).await {
                Err(ReservationError::Store(err)) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(ReservationError::Conflict(self.config.max_retries));
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Gives up a hold, returning its stock. Idempotent: repeating the call
    /// on an already-cancelled or expired reservation succeeds without
    /// crediting stock twice.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<(), ReservationError> {
        let mut attempt = 0u32;
        loop {
            match self.try_cancel(id).await {
                Err(ReservationError::Store(err)) if err.is_retryable() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(ReservationError::Conflict(self.config.max_retries));
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Returns the reservation exactly as persisted, with the expiry flag.
    pub async fn get_reservation(
        &self,
        id: ReservationId,
    ) -> Result<ReservationView, ReservationError> {
        let reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(ReservationError::NotFound(id))?;
        let is_expired = reservation.is_expired(Utc::now());
        Ok(ReservationView {
            reservation,
            is_expired,
        })
    }

    /// Returns current stock levels for a product.
    pub async fn get_stock(&self, product_id: &ProductId) -> Result<StockLevel, ReservationError> {
        let entry = self
            .store
            .ledger_entry(product_id)
            .await?
            .ok_or_else(|| ReservationError::ProductNotFound(product_id.clone()))?;
        Ok(StockLevel::from(&entry))
    }

    /// Adds provisioned units to a product, creating the ledger entry on
    /// first restock.
    #[tracing::instrument(skip(self))]
    pub async fn restock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockLevel, ReservationError> {
        if quantity == 0 {
            return Err(ReservationError::InvalidRequest(
                "restock quantity must be positive".to_string(),
            ));
        }
        let mut attempt = 0u32;
        loop {
            match self.try_restock(product_id, quantity).await {
                // DuplicateRow means another writer provisioned the entry
                // first; the next read sees it and restocks normally.
                Err(ReservationError::Store(err))
                    if err.is_retryable()
                        || matches!(err, store::StoreError::DuplicateRow { .. }) =>
                {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(ReservationError::Conflict(self.config.max_retries));
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Records a `ReservationFailed` outcome (and, on consumer paths, the
    /// processed-event marker) without touching the ledger.
    pub async fn record_reservation_failure(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
        unavailable_items: Vec<StockShortfall>,
        receipt: Option<ProcessedEvent>,
        correlation_id: Option<Uuid>,
    ) -> Result<(), ReservationError> {
        let event = ReservationFailed {
            order_id,
            reason: reason.into(),
            unavailable_items,
        };
        let outbox = OutboxEvent::new(order_id.to_string(), &event, correlation_id)
            .map_err(store::StoreError::Serialization)?;
        let mut txn = InventoryTxn::new().with_outbox(outbox);
        if let Some(receipt) = receipt {
            txn = txn.with_processed(receipt);
        }
        self.store.commit(txn).await?;
        metrics::counter!("reservation_failures_recorded_total").increment(1);
        Ok(())
    }

    fn validate(&self, cmd: &CreateReservation) -> Result<Duration, ReservationError> {
        if cmd.items.is_empty() {
            return Err(ReservationError::InvalidRequest(
                "reservation needs at least one item".to_string(),
            ));
        }
        for item in &cmd.items {
            if item.quantity == 0 {
                return Err(ReservationError::InvalidRequest(format!(
                    "zero quantity for {}",
                    item.product_id
                )));
            }
        }
        let ttl = cmd.ttl_minutes.unwrap_or(self.config.default_ttl_minutes);
        if !(MIN_TTL_MINUTES..=MAX_TTL_MINUTES).contains(&ttl) {
            return Err(ReservationError::InvalidRequest(format!(
                "ttl must be between {MIN_TTL_MINUTES} and {MAX_TTL_MINUTES} minutes, got {ttl}"
            )));
        }
        Ok(Duration::minutes(i64::from(ttl)))
    }

    async fn try_create(
        &self,
        cmd: &CreateReservation,
        ttl: Duration,
        receipt: Option<ProcessedEvent>,
    ) -> Result<Reservation, ReservationError> {
        let mut distinct: Vec<ProductId> = Vec::new();
        for item in &cmd.items {
            if !distinct.contains(&item.product_id) {
                distinct.push(item.product_id.clone());
            }
        }

        let entries = self.store.ledger_entries(&distinct).await?;
        let mut snapshot: HashMap<ProductId, (StockLedgerEntry, Version)> = entries
            .into_iter()
            .map(|entry| {
                let version = entry.version();
                (entry.product_id().clone(), (entry, version))
            })
            .collect();

        for product_id in &distinct {
            if !snapshot.contains_key(product_id) {
                return Err(ReservationError::ProductNotFound(product_id.clone()));
            }
        }

        // Check every item against the snapshot before touching anything,
        // so the rejection carries the complete shortfall list.
        let mut shortfalls = Vec::new();
        for item in &cmd.items {
            let Some((entry, _)) = snapshot.get_mut(&item.product_id) else {
                return Err(ReservationError::ProductNotFound(item.product_id.clone()));
            };
            match entry.reserve(item.quantity) {
                Ok(()) => {}
                Err(LedgerError::InsufficientStock { available, .. }) => {
                    shortfalls.push(StockShortfall {
                        product_id: item.product_id.clone(),
                        requested: item.quantity,
                        available,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }
        if !shortfalls.is_empty() {
            metrics::counter!("reservations_rejected_total").increment(1);
            return Err(ReservationError::InsufficientStock(shortfalls));
        }

        let now = Utc::now();
        let reservation = Reservation::new(cmd.order_id, cmd.items.clone(), now, ttl);
        let event = ItemsReserved {
            reservation_id: reservation.id(),
            order_id: cmd.order_id,
            items: reservation.items().to_vec(),
        };
        let outbox = OutboxEvent::new(reservation.id().to_string(), &event, cmd.correlation_id)
            .map_err(store::StoreError::Serialization)?;

        let mut txn = InventoryTxn::new()
            .with_reservation(ReservationWrite::insert(reservation.clone()))
            .with_outbox(outbox);
        for product_id in &distinct {
            if let Some((entry, read_version)) = snapshot.remove(product_id) {
                txn = txn.with_ledger(LedgerWrite::update(entry, read_version));
            }
        }
        if let Some(receipt) = receipt {
            txn = txn.with_processed(receipt);
        }

        self.store.commit(txn).await?;
        metrics::counter!("reservations_created_total").increment(1);
        tracing::info!(
            reservation_id = %reservation.id(),
            expires_at = %reservation.expires_at(),
            "reservation created"
        );
        Ok(reservation)
    }

    async fn try_confirm(&self, id: ReservationId) -> Result<(), ReservationError> {
        let mut reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(ReservationError::NotFound(id))?;
        let read_version = reservation.version();
        reservation.confirm(Utc::now())?;
        self.store
            .commit(
                InventoryTxn::new()
                    .with_reservation(ReservationWrite::update(reservation, read_version)),
            )
            .await?;
        metrics::counter!("reservations_confirmed_total").increment(1);
        tracing::info!(reservation_id = %id, "reservation confirmed");
        Ok(())
    }

    async fn try_cancel(&self, id: ReservationId) -> Result<(), ReservationError> {
        let mut reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(ReservationError::NotFound(id))?;
        let read_version = reservation.version();

        match reservation.cancel()? {
            // Already settled: succeed without crediting stock again.
            CancelOutcome::AlreadyInactive => return Ok(()),
            CancelOutcome::Released => {}
        }

        let mut txn = InventoryTxn::new()
            .with_reservation(ReservationWrite::update(reservation.clone(), read_version));
        for (product_id, quantity) in aggregate_quantities(reservation.items()) {
            let entry = self
                .store
                .ledger_entry(&product_id)
                .await?
                .ok_or_else(|| ReservationError::ProductNotFound(product_id.clone()))?;
            let entry_version = entry.version();
            let mut entry = entry;
            entry.release(quantity)?;
            txn = txn.with_ledger(LedgerWrite::update(entry, entry_version));
        }

        self.store.commit(txn).await?;
        metrics::counter!("reservations_cancelled_total").increment(1);
        tracing::info!(reservation_id = %id, "reservation cancelled, stock released");
        Ok(())
    }

    async fn try_restock(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<StockLevel, ReservationError> {
        let write = match self.store.ledger_entry(product_id).await? {
            Some(entry) => {
                let read_version = entry.version();
                let mut entry = entry;
                entry.restock(quantity)?;
                LedgerWrite::update(entry, read_version)
            }
            None => LedgerWrite::insert(StockLedgerEntry::new(product_id.clone(), quantity)),
        };
        let level = StockLevel::from(&write.entry);
        self.store
            .commit(InventoryTxn::new().with_ledger(write))
            .await?;
        tracing::info!(%product_id, quantity, "stock provisioned");
        Ok(level)
    }

    fn backoff(&self, attempt: u32) -> StdDuration {
        let base = self.config.retry_backoff;
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        base * attempt + StdDuration::from_millis(jitter_ms)
    }
}
