//! Atomic write units.
//!
//! A transaction bundles every row touched by one business operation:
//! ledger mutations, the reservation or order row, outbox rows for the
//! outcome, and (on consumer paths) the processed-event marker. A store
//! commits the whole bundle or none of it, checking every expectation
//! first.

use domain::{Order, OutboxEvent, ProcessedEvent, Reservation, StockLedgerEntry};

/// What a write expects to find in the store for its target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The row must not exist yet (fresh insert).
    Absent,

    /// The row must still be at this version (compare-and-swap update).
    Version(common::Version),
}

/// A ledger entry write together with the version observed at read time.
///
/// The entry carries its post-mutation state (version already bumped); the
/// expectation carries what the writer read before mutating.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    pub entry: StockLedgerEntry,
    pub expected: Expected,
}

impl LedgerWrite {
    /// An insert of a brand-new ledger entry.
    pub fn insert(entry: StockLedgerEntry) -> Self {
        Self {
            entry,
            expected: Expected::Absent,
        }
    }

    /// A CAS update against the version the writer read.
    pub fn update(entry: StockLedgerEntry, read_version: common::Version) -> Self {
        Self {
            entry,
            expected: Expected::Version(read_version),
        }
    }
}

/// A reservation row write with its expectation.
#[derive(Debug, Clone)]
pub struct ReservationWrite {
    pub reservation: Reservation,
    pub expected: Expected,
}

impl ReservationWrite {
    /// An insert of a brand-new reservation.
    pub fn insert(reservation: Reservation) -> Self {
        Self {
            reservation,
            expected: Expected::Absent,
        }
    }

    /// A CAS update against the version the writer read.
    pub fn update(reservation: Reservation, read_version: common::Version) -> Self {
        Self {
            reservation,
            expected: Expected::Version(read_version),
        }
    }
}

/// An order row write with its expectation.
#[derive(Debug, Clone)]
pub struct OrderWrite {
    pub order: Order,
    pub expected: Expected,
}

impl OrderWrite {
    /// An insert of a brand-new order.
    pub fn insert(order: Order) -> Self {
        Self {
            order,
            expected: Expected::Absent,
        }
    }

    /// A CAS update against the version the writer read.
    pub fn update(order: Order, read_version: common::Version) -> Self {
        Self {
            order,
            expected: Expected::Version(read_version),
        }
    }
}

/// Atomic write unit against the inventory store.
#[derive(Debug, Clone, Default)]
pub struct InventoryTxn {
    pub ledger: Vec<LedgerWrite>,
    pub reservation: Option<ReservationWrite>,
    pub outbox: Vec<OutboxEvent>,
    pub processed: Option<ProcessedEvent>,
}

impl InventoryTxn {
    /// An empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(mut self, write: LedgerWrite) -> Self {
        self.ledger.push(write);
        self
    }

    pub fn with_reservation(mut self, write: ReservationWrite) -> Self {
        self.reservation = Some(write);
        self
    }

    pub fn with_outbox(mut self, event: OutboxEvent) -> Self {
        self.outbox.push(event);
        self
    }

    pub fn with_processed(mut self, marker: ProcessedEvent) -> Self {
        self.processed = Some(marker);
        self
    }

    /// True if the transaction writes nothing.
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
            && self.reservation.is_none()
            && self.outbox.is_empty()
            && self.processed.is_none()
    }
}

/// Atomic write unit against the order store.
#[derive(Debug, Clone, Default)]
pub struct OrderTxn {
    pub order: Option<OrderWrite>,
    pub outbox: Vec<OutboxEvent>,
    pub processed: Option<ProcessedEvent>,
}

impl OrderTxn {
    /// An empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, write: OrderWrite) -> Self {
        self.order = Some(write);
        self
    }

    pub fn with_outbox(mut self, event: OutboxEvent) -> Self {
        self.outbox.push(event);
        self
    }

    pub fn with_processed(mut self, marker: ProcessedEvent) -> Self {
        self.processed = Some(marker);
        self
    }
}
