//! Per-product stock ledger.

use chrono::{DateTime, Utc};
use common::{ProductId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by ledger mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Not enough available stock to satisfy a reservation.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Attempt to release more units than are currently reserved.
    #[error("cannot release {requested} units of {product_id}: only {reserved} reserved")]
    InvalidRelease {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// The available/reserved/total bookkeeping no longer adds up.
    ///
    /// This is an internal-consistency failure, never a recoverable
    /// business error.
    #[error(
        "ledger corruption for {product_id}: available {available} + reserved {reserved} != total {total}"
    )]
    Corruption {
        product_id: ProductId,
        available: u32,
        reserved: u32,
        total: u32,
    },
}

/// Per-item shortfall detail carried by insufficient-stock failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    /// The under-supplied product.
    pub product_id: ProductId,

    /// Quantity the caller asked for.
    pub requested: u32,

    /// Quantity that was actually available.
    pub available: u32,
}

/// Stock bookkeeping for a single product.
///
/// `total` is always derived: every mutation recomputes it from
/// `available + reserved` and re-checks the sum invariant before returning.
/// The `version` field is the optimistic concurrency token; it is bumped on
/// every successful mutation and checked by the store at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    product_id: ProductId,
    available: u32,
    reserved: u32,
    total: u32,
    version: Version,
    updated_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    /// Creates a ledger entry for a product entering inventory.
    pub fn new(product_id: ProductId, available: u32) -> Self {
        Self {
            product_id,
            available,
            reserved: 0,
            total: available,
            version: Version::first(),
            updated_at: Utc::now(),
        }
    }

    /// Rehydrates an entry from stored fields. Intended for store
    /// implementations; callers are expected to pass back exactly what a
    /// previous commit persisted.
    pub fn from_parts(
        product_id: ProductId,
        available: u32,
        reserved: u32,
        total: u32,
        version: Version,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            available,
            reserved,
            total,
            version,
            updated_at,
        }
    }

    /// The product this entry tracks.
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Units free to be reserved.
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Units currently held by pending reservations.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Derived sum of available and reserved.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Current optimistic concurrency token.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Timestamp of the last mutation.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if `quantity` units can be reserved right now.
    pub fn is_available(&self, quantity: u32) -> bool {
        self.available >= quantity
    }

    /// Moves `quantity` units from available to reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), LedgerError> {
        if !self.is_available(quantity) {
            return Err(LedgerError::InsufficientStock {
                product_id: self.product_id.clone(),
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        self.touch()
    }

    /// Returns `quantity` previously reserved units to available.
    pub fn release(&mut self, quantity: u32) -> Result<(), LedgerError> {
        if quantity > self.reserved {
            return Err(LedgerError::InvalidRelease {
                product_id: self.product_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.available += quantity;
        self.touch()
    }

    /// Adds `quantity` newly provisioned units to available stock.
    pub fn restock(&mut self, quantity: u32) -> Result<(), LedgerError> {
        self.available += quantity;
        self.touch()
    }

    fn touch(&mut self) -> Result<(), LedgerError> {
        self.total = self.available + self.reserved;
        self.version = self.version.next();
        self.updated_at = Utc::now();
        self.check_invariants()
    }

    fn check_invariants(&self) -> Result<(), LedgerError> {
        if self.total != self.available + self.reserved {
            return Err(LedgerError::Corruption {
                product_id: self.product_id.clone(),
                available: self.available,
                reserved: self.reserved,
                total: self.total,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(available: u32) -> StockLedgerEntry {
        StockLedgerEntry::new(ProductId::new("SKU-001"), available)
    }

    #[test]
    fn new_entry_starts_with_nothing_reserved() {
        let e = entry(10);
        assert_eq!(e.available(), 10);
        assert_eq!(e.reserved(), 0);
        assert_eq!(e.total(), 10);
        assert_eq!(e.version(), Version::first());
    }

    #[test]
    fn reserve_moves_stock_and_bumps_version() {
        let mut e = entry(10);
        e.reserve(4).unwrap();
        assert_eq!(e.available(), 6);
        assert_eq!(e.reserved(), 4);
        assert_eq!(e.total(), 10);
        assert_eq!(e.version(), Version::first().next());
    }

    #[test]
    fn reserve_rejects_insufficient_stock() {
        let mut e = entry(3);
        let err = e.reserve(5).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                product_id: ProductId::new("SKU-001"),
                requested: 5,
                available: 3,
            }
        );
        // Failed mutation leaves the entry untouched.
        assert_eq!(e.available(), 3);
        assert_eq!(e.version(), Version::first());
    }

    #[test]
    fn reserve_exact_amount_drains_available() {
        let mut e = entry(5);
        e.reserve(5).unwrap();
        assert_eq!(e.available(), 0);
        assert_eq!(e.reserved(), 5);
        assert!(!e.is_available(1));
        assert!(e.is_available(0));
    }

    #[test]
    fn release_returns_stock() {
        let mut e = entry(10);
        e.reserve(4).unwrap();
        e.release(4).unwrap();
        assert_eq!(e.available(), 10);
        assert_eq!(e.reserved(), 0);
        assert_eq!(e.total(), 10);
    }

    #[test]
    fn release_rejects_more_than_reserved() {
        let mut e = entry(10);
        e.reserve(2).unwrap();
        let err = e.release(3).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRelease { reserved: 2, .. }));
        assert_eq!(e.reserved(), 2);
    }

    #[test]
    fn restock_adds_available() {
        let mut e = entry(1);
        e.restock(9).unwrap();
        assert_eq!(e.available(), 10);
        assert_eq!(e.total(), 10);
    }

    #[test]
    fn total_stays_derived_across_mutations() {
        let mut e = entry(8);
        e.reserve(3).unwrap();
        e.restock(5).unwrap();
        e.release(1).unwrap();
        assert_eq!(e.total(), e.available() + e.reserved());
        assert_eq!(e.version().as_i64(), 4);
    }
}
