//! Shared types used across the stock coordination workspace.
//!
//! Everything here is a plain value type: typed identifiers, the optimistic
//! concurrency `Version` token, and `Money`. No I/O, no async.

pub mod ids;
pub mod money;
pub mod version;

pub use ids::{CustomerId, EventId, OrderId, ProductId, ReservationId};
pub use money::Money;
pub use version::Version;
