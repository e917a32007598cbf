//! Reservation status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of a reservation in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬── confirm() ──► Confirmed   (terminal)
///           ├── cancel() ───► Cancelled   (terminal)
///           └── expire() ───► Expired     (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReservationStatus {
    /// Stock is held, awaiting confirmation or cancellation.
    #[default]
    Pending,

    /// The hold was converted into a firm allocation (terminal state).
    Confirmed,

    /// The hold was given up and stock returned (terminal state).
    Cancelled,

    /// The hold timed out and stock was returned by the reaper (terminal state).
    Expired,
}

impl ReservationStatus {
    /// Returns true if this is a terminal status (no further transitions).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Cancelled => "Cancelled",
            ReservationStatus::Expired => "Expired",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Illegal state-machine transitions.
///
/// The two variants are kept apart so callers can tell "this reservation was
/// already settled" from "this reservation ran out of time".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The reservation is already in a terminal status.
    #[error("reservation is already {0}")]
    AlreadyTerminal(ReservationStatus),

    /// The reservation's hold window has elapsed.
    #[error("reservation expired at {0}")]
    Expired(DateTime<Utc>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_pending() {
        assert_eq!(ReservationStatus::default(), ReservationStatus::Pending);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
    }

    #[test]
    fn display() {
        assert_eq!(ReservationStatus::Pending.to_string(), "Pending");
        assert_eq!(ReservationStatus::Confirmed.to_string(), "Confirmed");
        assert_eq!(ReservationStatus::Cancelled.to_string(), "Cancelled");
        assert_eq!(ReservationStatus::Expired.to_string(), "Expired");
    }

    #[test]
    fn serialization_roundtrip() {
        let status = ReservationStatus::Expired;
        let json = serde_json::to_string(&status).unwrap();
        let deserialized: ReservationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, deserialized);
    }
}
