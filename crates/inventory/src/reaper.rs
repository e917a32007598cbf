//! Expiry reaper: the sole authority for the EXPIRED transition.

use std::time::Duration;

use chrono::Utc;
use store::{InventoryStore, InventoryTxn, LedgerWrite, ReservationWrite};
use tokio::sync::watch;

use crate::error::ReservationError;
use crate::service::aggregate_quantities;

/// Reaper tuning knobs.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,

    /// Maximum reservations settled per sweep.
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Periodic task that expires timed-out Pending reservations and returns
/// their stock, one reservation at a time.
///
/// Each reservation is settled independently and idempotently: a hold that
/// a concurrent confirm or cancel already terminalized is skipped via the
/// state machine's `expire` guard, and the ledger version checks make a
/// lost race a clean no-op instead of a double release.
pub struct ExpiryReaper<S> {
    store: S,
    config: ReaperConfig,
}

impl<S: InventoryStore> ExpiryReaper<S> {
    /// Creates a reaper with default configuration.
    pub fn new(store: S) -> Self {
        Self::with_config(store, ReaperConfig::default())
    }

    /// Creates a reaper with explicit configuration.
    pub fn with_config(store: S, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// Runs the sweep loop until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("expiry reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Runs one sweep; returns how many reservations were expired.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<usize, ReservationError> {
        let now = Utc::now();
        let stale = self
            .store
            .expired_pending_reservations(now, self.config.batch_size)
            .await?;

        let mut expired = 0;
        for reservation in stale {
            let id = reservation.id();
            match self.expire_one(id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(ReservationError::Store(err)) if err.is_retryable() => {
                    // Lost a race against a confirm/cancel or another
                    // reaper instance; the next sweep re-reads the truth.
                    tracing::debug!(reservation_id = %id, "expiry lost version race, skipping");
                }
                Err(e) => {
                    tracing::error!(reservation_id = %id, error = %e, "failed to expire reservation");
                }
            }
        }

        if expired > 0 {
            metrics::counter!("reservations_expired_total").increment(expired as u64);
            tracing::info!(expired, "expiry sweep released timed-out holds");
        }
        Ok(expired)
    }

    /// Expires one reservation: releases every held item and transitions
    /// the row to Expired in a single atomic unit. Returns false if the
    /// reservation settled some other way since the sweep query ran.
    async fn expire_one(&self, id: common::ReservationId) -> Result<bool, ReservationError> {
        let Some(mut reservation) = self.store.reservation(id).await? else {
            return Ok(false);
        };
        let read_version = reservation.version();
        if !reservation.expire() {
            return Ok(false);
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
        tracing::info!(reservation_id = %id, "reservation expired, stock released");
        Ok(true)
    }
}
