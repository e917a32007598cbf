//! Domain event payloads exchanged between the two services.
//!
//! These are the facts carried inside the outbox/consumer envelope. The
//! payloads reference entities by id only; no entity crosses a service
//! boundary.

use common::{CustomerId, Money, OrderId, ReservationId};
use serde::{Deserialize, Serialize};

use crate::ledger::StockShortfall;
use crate::reservation::ReservationItem;

/// Trait implemented by every event payload, naming its wire type.
pub trait DomainEvent {
    /// The event type string recorded in outbox rows and envelopes.
    fn event_type(&self) -> &'static str;
}

/// Wire name of [`OrderCreated`].
pub const ORDER_CREATED: &str = "OrderCreated";

/// Wire name of [`ItemsReserved`].
pub const ITEMS_RESERVED: &str = "ItemsReserved";

/// Wire name of [`ReservationFailed`].
pub const RESERVATION_FAILED: &str = "ReservationFailed";

/// Emitted by the order service when a new order is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<ReservationItem>,
    pub total_amount: Money,
}

impl DomainEvent for OrderCreated {
    fn event_type(&self) -> &'static str {
        ORDER_CREATED
    }
}

/// Emitted by the inventory service when an order's stock was reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReserved {
    pub reservation_id: ReservationId,
    pub order_id: OrderId,
    pub items: Vec<ReservationItem>,
}

impl DomainEvent for ItemsReserved {
    fn event_type(&self) -> &'static str {
        ITEMS_RESERVED
    }
}

/// Emitted by the inventory service when a reservation could not be made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFailed {
    pub order_id: OrderId,
    /// Human-readable failure cause.
    pub reason: String,
    /// Per-item shortfall detail; empty when the failure was not a stock
    /// shortage (e.g. an unknown product).
    pub unavailable_items: Vec<StockShortfall>,
}

impl DomainEvent for ReservationFailed {
    fn event_type(&self) -> &'static str {
        RESERVATION_FAILED
    }
}
