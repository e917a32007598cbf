//! Order service error taxonomy.

use common::OrderId;
use domain::OrderStateError;
use store::StoreError;
use thiserror::Error;

/// Errors returned synchronously by the order service.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Unknown order id.
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// An illegal order state transition was attempted.
    #[error("invalid order state: {0}")]
    InvalidState(#[from] OrderStateError),

    /// The request itself is malformed (no lines, zero quantity).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Optimistic locking lost against concurrent writers for every retry.
    #[error("order conflict: gave up after {0} retries")]
    Conflict(u32),

    /// Store failure that survived the internal retry policy.
    #[error(transparent)]
    Store(#[from] StoreError),
}
