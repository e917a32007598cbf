//! Order entity for the order-taking side of the saga.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order in its lifecycle.
///
/// Orders start Pending when created; the inventory outcome drives them to
/// Confirmed (items reserved) or Cancelled (reservation failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order recorded, awaiting the reservation outcome.
    #[default]
    Pending,

    /// Items were reserved; the order stands (terminal state).
    Confirmed,

    /// The reservation failed or was withdrawn (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Illegal order state transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderStateError {
    #[error("order {order_id} is {status}, cannot {action}")]
    InvalidTransition {
        order_id: OrderId,
        status: OrderStatus,
        action: &'static str,
    },
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product ordered.
    pub product_id: ProductId,

    /// Units ordered, always > 0.
    pub quantity: u32,

    /// Unit price at order time.
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates an order line.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }

    /// Line total (unit price times quantity).
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    lines: Vec<OrderLine>,
    total_amount: Money,
    status: OrderStatus,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: Version,
}

impl Order {
    /// Creates a new pending order. The total is derived from the lines.
    pub fn new(customer_id: CustomerId, lines: Vec<OrderLine>, now: DateTime<Utc>) -> Self {
        let total_amount = lines
            .iter()
            .fold(Money::zero(), |acc, line| acc.add(line.line_total()));
        Self {
            id: OrderId::new(),
            customer_id,
            lines,
            total_amount,
            status: OrderStatus::Pending,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            version: Version::first(),
        }
    }

    /// Rehydrates an order from stored fields. Intended for store
    /// implementations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: OrderId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        total_amount: Money,
        status: OrderStatus,
        cancel_reason: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        version: Version,
    ) -> Self {
        Self {
            id,
            customer_id,
            lines,
            total_amount,
            status,
            cancel_reason,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Marks the order Confirmed after its items were reserved.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), OrderStateError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderStateError::InvalidTransition {
                order_id: self.id,
                status: self.status,
                action: "confirm",
            });
        }
        self.status = OrderStatus::Confirmed;
        self.updated_at = now;
        self.version = self.version.next();
        Ok(())
    }

    /// Cancels the order, recording the reason.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderStateError> {
        if self.status != OrderStatus::Pending {
            return Err(OrderStateError::InvalidTransition {
                order_id: self.id,
                status: self.status,
                action: "cancel",
            });
        }
        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.updated_at = now;
        self.version = self.version.next();
        Ok(())
    }
}
