//! Reservations: TTL-bounded stock holds tied to an order.

mod status;

pub use status::{ReservationStatus, TransitionError};

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, ProductId, ReservationId, Version};
use serde::{Deserialize, Serialize};

/// A single product hold within a reservation.
///
/// Items are owned by the reservation as plain values; the ledger side of
/// the hold is mirrored in the `reserved` column of the product's entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// The product held.
    pub product_id: ProductId,

    /// Units held, always > 0.
    pub quantity: u32,
}

impl ReservationItem {
    /// Creates a reservation item.
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The reservation transitioned from Pending to Cancelled; the caller
    /// must release the held stock exactly once.
    Released,

    /// The reservation was already Cancelled or Expired; nothing to do and
    /// no stock may be credited again.
    AlreadyInactive,
}

/// A temporary hold on stock for one order.
///
/// Reservations are never physically deleted; terminal rows stay around for
/// audit and idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: ReservationId,
    order_id: OrderId,
    items: Vec<ReservationItem>,
    status: ReservationStatus,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    version: Version,
}

impl Reservation {
    /// Creates a new pending reservation expiring `ttl` after `now`.
    pub fn new(
        order_id: OrderId,
        items: Vec<ReservationItem>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            order_id,
            items,
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            version: Version::first(),
        }
    }

    /// Rehydrates a reservation from stored fields. Intended for store
    /// implementations.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ReservationId,
        order_id: OrderId,
        items: Vec<ReservationItem>,
        status: ReservationStatus,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        version: Version,
    ) -> Self {
        Self {
            id,
            order_id,
            items,
            status,
            created_at,
            expires_at,
            version,
        }
    }

    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    /// The held items, in request order.
    pub fn items(&self) -> &[ReservationItem] {
        &self.items
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// True if the reservation is still Pending but its hold window has
    /// elapsed. Such a reservation is reported as-is until the reaper
    /// processes it; read paths must not reinterpret it as absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.expires_at
    }

    /// True if `confirm` would succeed at `now`.
    pub fn can_be_confirmed(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now < self.expires_at
    }

    /// True if `cancel` would release stock.
    pub fn can_be_cancelled(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    /// Converts the hold into a firm allocation.
    ///
    /// Legal only while Pending and before `expires_at`; the error
    /// distinguishes an already-settled reservation from a timed-out one.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.status));
        }
        if now >= self.expires_at {
            return Err(TransitionError::Expired(self.expires_at));
        }
        self.status = ReservationStatus::Confirmed;
        self.version = self.version.next();
        Ok(())
    }

    /// Gives up the hold.
    ///
    /// Idempotent on Cancelled/Expired; rejected on Confirmed because a
    /// firm allocation cannot be rolled back through this path. The
    /// returned outcome tells the caller whether stock must be released.
    pub fn cancel(&mut self) -> Result<CancelOutcome, TransitionError> {
        match self.status {
            ReservationStatus::Pending => {
                self.status = ReservationStatus::Cancelled;
                self.version = self.version.next();
                Ok(CancelOutcome::Released)
            }
            ReservationStatus::Cancelled | ReservationStatus::Expired => {
                Ok(CancelOutcome::AlreadyInactive)
            }
            ReservationStatus::Confirmed => {
                Err(TransitionError::AlreadyTerminal(ReservationStatus::Confirmed))
            }
        }
    }

    /// Marks the reservation Expired. Returns true if the status actually
    /// changed; a no-op on any terminal status so a racing reaper never
    /// double-releases stock.
    pub fn expire(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ReservationStatus::Expired;
        self.version = self.version.next();
        true
    }
}
