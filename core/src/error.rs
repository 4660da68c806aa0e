//! Error taxonomy for booking operations.

use crate::types::{OrderId, OrderStatus, ScheduleId, SeatId, StudioId, MovieId, UserId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for booking operations
pub type Result<T> = std::result::Result<T, BookingError>;

/// Errors that can occur during booking operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// One or more requested seats already have an active (PENDING or CONFIRMED) entry.
    ///
    /// Caller-recoverable: choose other seats. Never retried automatically.
    #[error("Seats unavailable: {conflicting_seat_ids:?}")]
    SeatUnavailable {
        /// Every requested seat that conflicted
        conflicting_seat_ids: Vec<SeatId>,
    },

    /// The order is in a different terminal state than the one requested.
    #[error("Order {order_id} cannot move from {current} to {requested}")]
    InvalidTransition {
        /// Order ID
        order_id: OrderId,
        /// Status the order is actually in
        current: OrderStatus,
        /// Status the caller asked for
        requested: OrderStatus,
    },

    /// Payment confirmation arrived at or after the hold deadline.
    #[error("Hold for order {order_id} expired at {expires_at}")]
    HoldExpired {
        /// Order ID
        order_id: OrderId,
        /// The deadline that was missed
        expires_at: DateTime<Utc>,
    },

    /// Infrastructure failure (connection loss, deadlock, serialization failure).
    ///
    /// Retryable. A booking caller seeing this must not assume the seats were held.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Schedule does not exist or is soft-deleted
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    /// One or more seats do not belong to the schedule's studio
    #[error("Seats do not belong to the schedule's studio: {seat_ids:?}")]
    StudioMismatch {
        /// Foreign or unknown seats
        seat_ids: Vec<SeatId>,
    },

    /// Order does not exist
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Movie does not exist
    #[error("Movie not found: {0}")]
    MovieNotFound(MovieId),

    /// Studio does not exist
    #[error("Studio not found: {0}")]
    StudioNotFound(StudioId),

    /// Request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caller is not the customer who placed the order
    #[error("User {user_id} does not own order {order_id}")]
    NotOrderOwner {
        /// Order ID
        order_id: OrderId,
        /// The caller
        user_id: UserId,
    },

    /// Schedule still has PENDING or CONFIRMED entries
    #[error("Schedule {0} has active reservations")]
    ScheduleHasActiveReservations(ScheduleId),

    /// Reserving would push `booked_seats` past the studio capacity
    #[error("Schedule {schedule_id} would exceed capacity of {capacity} seats")]
    CapacityExceeded {
        /// Schedule ID
        schedule_id: ScheduleId,
        /// Studio seat capacity
        capacity: u32,
    },

    /// Non-retryable persistence error (decoding, constraint misuse)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BookingError {
    /// Whether the operation may succeed if attempted again unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }

    /// HTTP-equivalent status code for the inbound interface.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::SeatUnavailable { .. }
            | Self::InvalidTransition { .. }
            | Self::ScheduleHasActiveReservations(_)
            | Self::CapacityExceeded { .. } => 409,
            Self::HoldExpired { .. } => 410,
            Self::ScheduleNotFound(_)
            | Self::StudioMismatch { .. }
            | Self::InvalidRequest(_) => 400,
            Self::OrderNotFound(_) | Self::MovieNotFound(_) | Self::StudioNotFound(_) => 404,
            Self::NotOrderOwner { .. } => 403,
            Self::TransientStore(_) => 503,
            Self::Storage(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(BookingError::TransientStore("connection reset".into()).is_retryable());
        assert!(!BookingError::Storage("bad row".into()).is_retryable());
        assert!(
            !BookingError::SeatUnavailable {
                conflicting_seat_ids: vec![SeatId::new()]
            }
            .is_retryable()
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            BookingError::SeatUnavailable {
                conflicting_seat_ids: vec![]
            }
            .status_code(),
            409
        );
        assert_eq!(BookingError::ScheduleNotFound(ScheduleId::new()).status_code(), 400);
        assert_eq!(BookingError::OrderNotFound(OrderId::new()).status_code(), 404);
        assert_eq!(BookingError::TransientStore(String::new()).status_code(), 503);
    }
}
