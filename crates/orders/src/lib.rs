//! Order service: the order-taking side of the saga.
//!
//! [`OrderService`] records orders together with their `OrderCreated`
//! outbox row; the [`ReservationOutcomeHandler`] consumes the inventory
//! side's verdict and settles each order as Confirmed or Cancelled.

pub mod error;
pub mod handler;
pub mod service;

pub use error::OrderError;
pub use handler::ReservationOutcomeHandler;
pub use service::{CreateOrder, OrderService, OrderServiceConfig};
