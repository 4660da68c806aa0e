//! Reservation ledger: the authority on which order holds which seat.
//!
//! # Design
//!
//! Every mutation of the ledger is a single store transaction that also adjusts the
//! cached `booked_seats` counter of the affected schedule. Implementations must
//! guarantee:
//!
//! - **No double booking**: for a `(schedule_id, seat_id)` pair at most one entry is
//!   PENDING or CONFIRMED. Conflicting reservations fail with
//!   [`BookingError::SeatUnavailable`](crate::BookingError::SeatUnavailable).
//! - **All or nothing**: a multi-seat reservation either holds every seat or none.
//! - **Single exit from PENDING**: [`ReservationLedger::transition_order`] is a
//!   compare-and-swap on the PENDING status, so racing payment, expiry and
//!   cancellation produce exactly one terminal state and at most one decrement.
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `cinema-booking-postgres`): per-seat advisory locks
//!   plus a partial unique index
//! - `InMemoryBookingStore` (in `cinema-booking-testing`): a single mutex

use crate::BookingFuture;
use crate::types::{
    CounterDrift, Order, OrderDraft, OrderId, OrderItem, OrderStatus, ScheduleId,
    TransitionOutcome,
};
use chrono::{DateTime, Utc};

/// Transactional store for orders and their seat entries.
///
/// # Dyn Compatibility
///
/// Methods return [`BookingFuture`] so the ledger can be shared as
/// `Arc<dyn ReservationLedger>`.
pub trait ReservationLedger: Send + Sync {
    /// Hold every seat in the draft for its schedule and persist the PENDING order.
    ///
    /// In one transaction: locks each `(schedule, seat)` pair in ascending seat order,
    /// checks for active entries, inserts the order and one PENDING entry per seat
    /// (price and snapshot read from the schedule), and increments `booked_seats`.
    ///
    /// # Errors
    ///
    /// - `ScheduleNotFound`: schedule missing or soft-deleted
    /// - `StudioMismatch`: a seat is not part of the schedule's studio
    /// - `SeatUnavailable`: one or more seats already held; lists every conflict
    /// - `CapacityExceeded`: the counter would pass the studio capacity
    /// - `TransientStore`: infrastructure failure; nothing was written
    fn reserve_seats(&self, draft: OrderDraft) -> BookingFuture<'_, Order>;

    /// Move a PENDING order and its PENDING entries to `to`.
    ///
    /// Releasing statuses (EXPIRED, FAILED, CANCELLED) decrement each affected
    /// schedule's counter by the number of entries released. PAID sets `paid_at`.
    /// A non-PENDING order is left untouched and reported as
    /// [`TransitionOutcome::AlreadyInState`] or [`TransitionOutcome::Superseded`].
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    /// - `InvalidRequest`: `to` is PENDING
    /// - `TransientStore`: infrastructure failure; nothing was written
    fn transition_order(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, TransitionOutcome>;

    /// Load an order with its entries.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn load_order(&self, order_id: OrderId) -> BookingFuture<'_, Option<Order>>;

    /// Every entry ever written for a schedule, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn entries_for_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Vec<OrderItem>>;

    /// PENDING orders whose deadline is at or before `now`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn overdue_orders(&self, now: DateTime<Utc>, limit: usize) -> BookingFuture<'_, Vec<OrderId>>;

    /// Recompute `booked_seats` from active entries and correct any drift.
    ///
    /// Checks one schedule when `schedule_id` is given, otherwise every schedule.
    /// Returns only the schedules that were corrected.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails.
    fn reconcile_booked_seats(
        &self,
        schedule_id: Option<ScheduleId>,
    ) -> BookingFuture<'_, Vec<CounterDrift>>;
}

/// Classify the outcome of a transition attempt against an order's current status.
///
/// Shared by implementations so the compare-and-swap reads the same everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// Order is PENDING; apply the transition
    Apply,
    /// Order already has the requested status
    AlreadyInState,
    /// Order reached a different terminal status first
    Superseded,
}

impl TransitionCheck {
    /// Compare the current status with the requested one.
    #[must_use]
    pub fn evaluate(current: OrderStatus, requested: OrderStatus) -> Self {
        if current == requested {
            Self::AlreadyInState
        } else if current.can_transition_to(requested) {
            Self::Apply
        } else {
            Self::Superseded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_orders_apply() {
        assert_eq!(
            TransitionCheck::evaluate(OrderStatus::Pending, OrderStatus::Expired),
            TransitionCheck::Apply
        );
    }

    #[test]
    fn same_target_is_idempotent() {
        assert_eq!(
            TransitionCheck::evaluate(OrderStatus::Paid, OrderStatus::Paid),
            TransitionCheck::AlreadyInState
        );
    }

    #[test]
    fn different_terminal_is_superseded() {
        assert_eq!(
            TransitionCheck::evaluate(OrderStatus::Expired, OrderStatus::Paid),
            TransitionCheck::Superseded
        );
        assert_eq!(
            TransitionCheck::evaluate(OrderStatus::Paid, OrderStatus::Cancelled),
            TransitionCheck::Superseded
        );
    }
}
