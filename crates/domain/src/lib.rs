//! Domain layer for the stock coordination system.
//!
//! Holds the per-product stock ledger, the reservation lifecycle, the order
//! side of the saga, and the durable outbox/processed-event row types. All
//! types here are plain data with synchronous validation; persistence and
//! orchestration live in the `store` and service crates.

pub mod events;
pub mod ledger;
pub mod order;
pub mod outbox;
pub mod reservation;

pub use events::{DomainEvent, ItemsReserved, OrderCreated, ReservationFailed};
pub use ledger::{LedgerError, StockLedgerEntry, StockShortfall};
pub use order::{Order, OrderLine, OrderStateError, OrderStatus};
pub use outbox::{OutboxEvent, OutboxStatus, ProcessedEvent};
pub use reservation::{
    CancelOutcome, Reservation, ReservationItem, ReservationStatus, TransitionError,
};
