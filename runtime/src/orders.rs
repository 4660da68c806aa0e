//! Order aggregate: the booking lifecycle on top of the reservation ledger.
//!
//! | Transition          | Trigger                                    | Seats            |
//! |---------------------|--------------------------------------------|------------------|
//! | PENDING → PAID      | successful payment before `expires_at`     | confirmed, held  |
//! | PENDING → EXPIRED   | expiry job (or sweep) after `expires_at`   | released         |
//! | PENDING → FAILED    | payment reported failure                   | released         |
//! | PENDING → CANCELLED | owner cancels before `expires_at`          | released         |
//!
//! Whichever transition commits first wins. A caller that asked for the same target
//! sees success; a caller that asked for a different one gets
//! [`BookingError::InvalidTransition`].

use chrono::{DateTime, Utc};
use cinema_booking_core::environment::{Clock, OrderNumberGenerator};
use cinema_booking_core::expiry::ExpiryQueue;
use cinema_booking_core::ledger::ReservationLedger;
use cinema_booking_core::registry::ScheduleRegistry;
use cinema_booking_core::{
    BookingConfig, BookingError, Order, OrderDraft, OrderId, OrderStatus, PaymentMethod, Result,
    ScheduleId, Seat, SeatId, SeatMap, TransitionOutcome, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{ExpiryMetrics, OrderMetrics};

/// Injected dependencies for the order service.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Catalog and seat inventory
    pub registry: Arc<dyn ScheduleRegistry>,
    /// Reservation ledger
    pub ledger: Arc<dyn ReservationLedger>,
    /// Delayed expiry jobs
    pub queue: Arc<dyn ExpiryQueue>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Order number source
    pub order_numbers: Arc<dyn OrderNumberGenerator>,
}

/// Inbound booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrder {
    /// Customer placing the order
    pub user_id: UserId,
    /// Showtime to book
    pub schedule_id: ScheduleId,
    /// Seats to hold
    pub seat_ids: Vec<SeatId>,
    /// Declared payment method
    pub payment_method: PaymentMethod,
}

/// Payment callback from the external gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Order being paid
    pub order_id: OrderId,
    /// Whether the gateway captured the payment
    pub success: bool,
}

/// What an expiry attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// This call expired the order and released `released` seats
    Expired {
        /// Seats given back
        released: u32,
    },
    /// The order had already left PENDING
    AlreadyFinal(OrderStatus),
    /// The deadline has not passed yet
    NotYetDue(DateTime<Utc>),
    /// No such order
    Missing,
}

/// Booking lifecycle operations.
#[derive(Clone)]
pub struct OrderService {
    env: BookingEnvironment,
    config: BookingConfig,
}

impl OrderService {
    /// Create a new order service.
    #[must_use]
    pub const fn new(env: BookingEnvironment, config: BookingConfig) -> Self {
        Self { env, config }
    }

    /// Booking policy in effect.
    #[must_use]
    pub const fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Injected dependencies.
    #[must_use]
    pub const fn environment(&self) -> &BookingEnvironment {
        &self.env
    }

    /// Hold the requested seats and schedule the hold's expiry.
    ///
    /// The expiry job is enqueued after the reservation commits. If enqueuing fails
    /// the order is still returned; the overdue sweep expires it later.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: empty or duplicate seat list, more than `max_seats_per_order`,
    ///   or a hold duration whose deadline cannot be represented
    /// - `ScheduleNotFound`, `StudioMismatch`, `SeatUnavailable`, `CapacityExceeded`
    /// - `TransientStore`: nothing was reserved
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        self.validate(&request)?;

        let schedule = self
            .env
            .registry
            .get_schedule(request.schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(request.schedule_id))?;

        let seat_count = request.seat_ids.len();
        let total = i64::try_from(seat_count)
            .ok()
            .and_then(|n| schedule.price.checked_mul(n))
            .ok_or_else(|| BookingError::InvalidRequest("order total overflows".to_string()))?;

        let now = self.env.clock.now();
        let expires_at = now.checked_add_signed(self.config.hold()).ok_or_else(|| {
            BookingError::InvalidRequest("hold duration puts the deadline out of range".to_string())
        })?;
        let draft = OrderDraft {
            order_id: OrderId::new(),
            user_id: request.user_id,
            order_number: self.env.order_numbers.generate(now),
            payment_method: request.payment_method,
            schedule_id: request.schedule_id,
            seat_ids: request.seat_ids,
            expires_at,
            created_at: now,
        };

        let started = Instant::now();
        let order = match self.env.ledger.reserve_seats(draft).await {
            Ok(order) => order,
            Err(err) => {
                if let BookingError::SeatUnavailable {
                    conflicting_seat_ids,
                } = &err
                {
                    OrderMetrics::record_seat_conflict();
                    tracing::info!(
                        schedule_id = %request.schedule_id,
                        conflicts = conflicting_seat_ids.len(),
                        "Reservation rejected, seats already held"
                    );
                }
                return Err(err);
            }
        };
        OrderMetrics::record_reserved(seat_count, started.elapsed());

        if let Err(err) = self.env.queue.enqueue(order.id, order.expires_at).await {
            ExpiryMetrics::record_enqueue_failure();
            tracing::warn!(
                order_id = %order.id,
                expires_at = %order.expires_at,
                error = %err,
                "Failed to enqueue expiry job, relying on overdue sweep"
            );
        }

        tracing::info!(
            event = "order.reserved",
            order_id = %order.id,
            order_number = %order.order_number,
            schedule_id = %request.schedule_id,
            seat_count,
            total = %total,
            expires_at = %order.expires_at,
            "Seats reserved"
        );

        Ok(order)
    }

    /// Apply a payment result to a PENDING order.
    ///
    /// Success moves the order to PAID, failure to FAILED. A successful payment that
    /// arrives at or after `expires_at` expires the order instead.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`
    /// - `HoldExpired`: payment arrived after the deadline; seats were released
    /// - `InvalidTransition`: the order already reached a different terminal state
    pub async fn confirm_payment(&self, confirmation: PaymentConfirmation) -> Result<Order> {
        let order = self.load(confirmation.order_id).await?;
        let now = self.env.clock.now();

        if confirmation.success && order.status == OrderStatus::Pending && order.is_past_deadline(now)
        {
            OrderMetrics::record_late_payment();
            return self.expire_after_deadline(order, now).await;
        }

        let target = if confirmation.success {
            OrderStatus::Paid
        } else {
            OrderStatus::Failed
        };
        self.transition(order.id, target, now).await
    }

    /// Cancel a PENDING order on behalf of its owner.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`
    /// - `NotOrderOwner`: `requested_by` did not place the order
    /// - `HoldExpired`: the deadline already passed; the order was expired instead
    /// - `InvalidTransition`: the order already reached a different terminal state
    pub async fn cancel_order(&self, order_id: OrderId, requested_by: UserId) -> Result<Order> {
        let order = self.load(order_id).await?;
        if order.user_id != requested_by {
            return Err(BookingError::NotOrderOwner {
                order_id,
                user_id: requested_by,
            });
        }

        let now = self.env.clock.now();
        if order.status == OrderStatus::Pending && order.is_past_deadline(now) {
            return self.expire_after_deadline(order, now).await;
        }

        self.transition(order_id, OrderStatus::Cancelled, now).await
    }

    /// Expire an order whose hold deadline has passed.
    ///
    /// Safe to call any number of times: only the first call that finds the order
    /// PENDING and overdue changes anything.
    ///
    /// # Errors
    ///
    /// Returns store errors; `TransientStore` is retryable.
    pub async fn expire_order(&self, order_id: OrderId) -> Result<ExpiryOutcome> {
        let Some(order) = self.env.ledger.load_order(order_id).await? else {
            return Ok(ExpiryOutcome::Missing);
        };
        if order.status.is_terminal() {
            return Ok(ExpiryOutcome::AlreadyFinal(order.status));
        }

        let now = self.env.clock.now();
        if !order.is_past_deadline(now) {
            return Ok(ExpiryOutcome::NotYetDue(order.expires_at));
        }

        match self
            .env
            .ledger
            .transition_order(order_id, OrderStatus::Expired, now)
            .await?
        {
            TransitionOutcome::Applied { order, released } => {
                record_transition(&order, released);
                Ok(ExpiryOutcome::Expired { released })
            }
            TransitionOutcome::AlreadyInState(order) | TransitionOutcome::Superseded(order) => {
                Ok(ExpiryOutcome::AlreadyFinal(order.status))
            }
        }
    }

    /// Load an order with its entries.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` if the order does not exist.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    /// Availability of every seat for a schedule. Advisory only.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound` if the schedule is missing or soft-deleted.
    pub async fn seat_map(&self, schedule_id: ScheduleId) -> Result<SeatMap> {
        self.env.registry.seat_map(schedule_id).await
    }

    /// Seats that can currently be booked for a schedule. Advisory only.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound` if the schedule is missing or soft-deleted.
    pub async fn available_seats(&self, schedule_id: ScheduleId) -> Result<Vec<Seat>> {
        self.env.registry.available_seats(schedule_id).await
    }

    fn validate(&self, request: &CreateOrder) -> Result<()> {
        if request.seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest(
                "at least one seat is required".to_string(),
            ));
        }
        if request.seat_ids.len() > self.config.max_seats_per_order {
            return Err(BookingError::InvalidRequest(format!(
                "at most {} seats per order",
                self.config.max_seats_per_order
            )));
        }
        let mut seen = HashSet::with_capacity(request.seat_ids.len());
        if let Some(duplicate) = request.seat_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(BookingError::InvalidRequest(format!(
                "seat {duplicate} requested more than once"
            )));
        }
        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.env
            .ledger
            .load_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound(order_id))
    }

    async fn transition(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        match self.env.ledger.transition_order(order_id, target, at).await? {
            TransitionOutcome::Applied { order, released } => {
                record_transition(&order, released);
                Ok(order)
            }
            TransitionOutcome::AlreadyInState(order) => {
                tracing::debug!(
                    order_id = %order_id,
                    status = %order.status,
                    "Order already in requested state"
                );
                Ok(order)
            }
            TransitionOutcome::Superseded(order) => {
                OrderMetrics::record_transition_conflict();
                tracing::info!(
                    order_id = %order_id,
                    current = %order.status,
                    requested = %target,
                    "Order transition lost to a concurrent winner"
                );
                Err(BookingError::InvalidTransition {
                    order_id,
                    current: order.status,
                    requested: target,
                })
            }
        }
    }

    /// Expire a PENDING order whose deadline passed before the caller's action.
    async fn expire_after_deadline(&self, order: Order, now: DateTime<Utc>) -> Result<Order> {
        tracing::info!(
            order_id = %order.id,
            expires_at = %order.expires_at,
            "Hold deadline passed, expiring order"
        );

        match self
            .env
            .ledger
            .transition_order(order.id, OrderStatus::Expired, now)
            .await?
        {
            TransitionOutcome::Applied { order, released } => record_transition(&order, released),
            // A payment that raced us and committed first keeps the seats.
            TransitionOutcome::Superseded(current) if current.status == OrderStatus::Paid => {
                return Ok(current);
            }
            TransitionOutcome::AlreadyInState(_) | TransitionOutcome::Superseded(_) => {}
        }

        Err(BookingError::HoldExpired {
            order_id: order.id,
            expires_at: order.expires_at,
        })
    }
}

fn record_transition(order: &Order, released: u32) {
    let event = match order.status {
        OrderStatus::Paid => {
            OrderMetrics::record_paid(order.items.len());
            "order.paid"
        }
        OrderStatus::Failed => {
            OrderMetrics::record_released("failed", released);
            "order.failed"
        }
        OrderStatus::Cancelled => {
            OrderMetrics::record_released("cancelled", released);
            "order.cancelled"
        }
        OrderStatus::Expired => {
            OrderMetrics::record_released("expired", released);
            "order.expired"
        }
        OrderStatus::Pending => return,
    };

    tracing::info!(
        event,
        order_id = %order.id,
        order_number = %order.order_number,
        status = %order.status,
        released,
        "Order transitioned"
    );
}
