//! Inventory service error taxonomy.

use common::{ProductId, ReservationId};
use domain::{LedgerError, StockShortfall, TransitionError};
use store::StoreError;
use thiserror::Error;

/// Errors returned synchronously by the reservation orchestrator.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// A referenced product has no ledger entry; nothing was mutated.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// One or more items could not be covered; the ledger is untouched and
    /// the full shortfall list is carried for the caller.
    #[error("insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    /// Optimistic locking lost against concurrent writers for every
    /// retry; the caller should retry the whole request.
    #[error("reservation conflict: gave up after {0} retries")]
    Conflict(u32),

    /// An illegal state-machine transition was attempted.
    #[error("invalid reservation state: {0}")]
    InvalidState(#[from] TransitionError),

    /// Unknown reservation id.
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),

    /// The request itself is malformed (empty items, zero quantity,
    /// out-of-range TTL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Ledger bookkeeping failure; `Corruption` here is fatal, not a
    /// business outcome.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Store failure that survived the internal retry policy.
    #[error(transparent)]
    Store(#[from] StoreError),
}
