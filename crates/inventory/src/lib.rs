//! Inventory service: stock reservations over the ledger.
//!
//! The [`ReservationService`] runs every reservation operation as a
//! short-lived read-validate-write sequence committed through the store's
//! optimistic version checks; the [`ExpiryReaper`] releases timed-out
//! holds on a period; the [`OrderCreatedHandler`] wires the service into
//! the saga choreography.

pub mod error;
pub mod handler;
pub mod reaper;
pub mod service;

pub use error::ReservationError;
pub use handler::OrderCreatedHandler;
pub use reaper::{ExpiryReaper, ReaperConfig};
pub use service::{
    CreateReservation, ReservationService, ReservationView, ServiceConfig, StockLevel,
};
