//! Order lifecycle scenarios against the in-memory stores.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{DateTime, Duration, Utc};
use cinema_booking_core::expiry::ExpiryQueue;
use cinema_booking_core::ledger::ReservationLedger;
use cinema_booking_core::{
    BookingConfig, BookingError, BookingFuture, CounterDrift, ItemStatus, Order, OrderDraft,
    OrderId, OrderItem, OrderStatus, ScheduleId, TransitionOutcome, UserId,
};
use cinema_booking_runtime::{ExpiryOutcome, ExpiryWorkerConfig, OrderService, PaymentConfirmation};
use cinema_booking_testing::{CinemaFixture, InMemoryBookingStore, init_test_tracing};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Barrier;

#[tokio::test]
async fn reserve_then_pay_confirms_seats() {
    init_test_tracing();
    let cinema = CinemaFixture::new().await;

    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.total_item_price.cents(), 10_000);
    assert_eq!(order.expires_at, cinema.clock_now() + Duration::minutes(15));
    assert!(order.order_number.starts_with("ORD-20250101-"));
    assert_eq!(cinema.booked_seats(), 2);

    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert_eq!(job.run_at, order.expires_at);

    cinema.clock.advance(Duration::minutes(5));
    let paid = cinema
        .service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap();

    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(paid.paid_at, Some(cinema.clock_now()));
    assert!(paid.items.iter().all(|item| item.status == ItemStatus::Confirmed));
    assert_eq!(cinema.booked_seats(), 2);
}

#[tokio::test]
async fn unpaid_hold_expires_and_seat_becomes_bookable() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());

    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["B7"]))
        .await
        .unwrap();
    assert_eq!(cinema.booked_seats(), 1);

    cinema.clock.advance(Duration::minutes(15));
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.expired, 1);

    let expired = cinema.service.get_order(order.id).await.unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert!(expired.items.iter().all(|item| item.status == ItemStatus::Expired));
    assert_eq!(cinema.booked_seats(), 0);

    let available = cinema.service.available_seats(cinema.schedule.id).await.unwrap();
    assert!(available.iter().any(|seat| seat.id == cinema.seat("B7")));

    let rebooked = cinema
        .service
        .create_order(cinema.request(UserId::new(), &["B7"]))
        .await
        .unwrap();
    assert_eq!(rebooked.status, OrderStatus::Pending);
    assert_eq!(cinema.booked_seats(), 1);
}

#[tokio::test]
async fn simultaneous_requests_for_one_seat_yield_one_order() {
    let cinema = CinemaFixture::new().await;
    let a12 = cinema.seat("A12");

    let first = {
        let service = cinema.service.clone();
        let request = cinema.request(UserId::new(), &["A12"]);
        tokio::spawn(async move { service.create_order(request).await })
    };
    let second = {
        let service = cinema.service.clone();
        let request = cinema.request(UserId::new(), &["A12"]);
        tokio::spawn(async move { service.create_order(request).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(
        loser,
        &BookingError::SeatUnavailable {
            conflicting_seat_ids: vec![a12]
        }
    );
    assert_eq!(cinema.booked_seats(), 1);
    assert_eq!(cinema.store.active_entry_count(cinema.schedule.id), 1);
}

#[tokio::test]
async fn partial_overlap_reserves_nothing() {
    let cinema = CinemaFixture::new().await;
    cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A3"]))
        .await
        .unwrap();

    let err = cinema
        .service
        .create_order(cinema.request(UserId::new(), &["A2", "A3", "A4"]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BookingError::SeatUnavailable {
            conflicting_seat_ids: vec![cinema.seat("A3")]
        }
    );
    let map = cinema.service.seat_map(cinema.schedule.id).await.unwrap();
    assert_eq!(map.unavailable().len(), 1);
    assert_eq!(cinema.booked_seats(), 1);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_the_ledger() {
    let cinema = CinemaFixture::with_layout(
        &["A"],
        12,
        BookingConfig::default().with_max_seats_per_order(2),
    )
    .await;

    let empty = cinema.service.create_order(cinema.request(cinema.customer, &[])).await;
    assert!(matches!(empty, Err(BookingError::InvalidRequest(_))));

    let duplicate = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A1"]))
        .await;
    assert!(matches!(duplicate, Err(BookingError::InvalidRequest(_))));

    let too_many = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2", "A3"]))
        .await;
    assert!(matches!(too_many, Err(BookingError::InvalidRequest(_))));

    assert!(cinema.store.orders().is_empty());
}

#[tokio::test]
async fn unrepresentable_hold_deadline_is_rejected() {
    let cinema = CinemaFixture::with_layout(
        &["A"],
        4,
        BookingConfig::default()
            .with_hold_duration(std::time::Duration::from_secs(1_000_000_000_000_000)),
    )
    .await;

    let err = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::InvalidRequest(_)));
    assert!(cinema.store.orders().is_empty());
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn seats_from_another_studio_are_rejected() {
    let cinema = CinemaFixture::new().await;
    let other = CinemaFixture::new().await;

    let mut request = cinema.request(cinema.customer, &["A1"]);
    request.seat_ids.push(other.seat("A2"));

    let err = cinema.service.create_order(request).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::StudioMismatch {
            seat_ids: vec![other.seat("A2")]
        }
    );
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn unknown_schedule_is_rejected() {
    let cinema = CinemaFixture::new().await;
    let mut request = cinema.request(cinema.customer, &["A1"]);
    request.schedule_id = cinema_booking_core::ScheduleId::new();

    let err = cinema.service.create_order(request.clone()).await.unwrap_err();
    assert_eq!(err, BookingError::ScheduleNotFound(request.schedule_id));
}

#[tokio::test]
async fn failed_payment_releases_seats() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2", "A3"]))
        .await
        .unwrap();

    let failed = cinema
        .service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: false,
        })
        .await
        .unwrap();

    assert_eq!(failed.status, OrderStatus::Failed);
    assert!(failed.items.iter().all(|item| item.status == ItemStatus::Cancelled));
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn only_the_owner_can_cancel() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A5"]))
        .await
        .unwrap();

    let stranger = UserId::new();
    let err = cinema.service.cancel_order(order.id, stranger).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::NotOrderOwner {
            order_id: order.id,
            user_id: stranger
        }
    );
    assert_eq!(cinema.booked_seats(), 1);

    let cancelled = cinema.service.cancel_order(order.id, cinema.customer).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cinema.booked_seats(), 0);

    // Cancelling twice is a no-op success
    let again = cinema.service.cancel_order(order.id, cinema.customer).await.unwrap();
    assert_eq!(again.status, OrderStatus::Cancelled);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn payment_at_the_deadline_expires_the_order() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(15));
    let err = cinema
        .service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BookingError::HoldExpired {
            order_id: order.id,
            expires_at: order.expires_at
        }
    );
    let stored = cinema.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn payment_after_expiry_is_an_invalid_transition() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(16));
    worker.run_once().await.unwrap();

    let err = cinema
        .service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::InvalidTransition {
            order_id: order.id,
            current: OrderStatus::Expired,
            requested: OrderStatus::Paid,
        }
    );
    assert_eq!(cinema.booked_seats(), 0);
}

/// Ledger that lets a competing transition commit just before the caller's own.
///
/// Models a second instance whose transition lands between this instance's read
/// of a PENDING order and its compare-and-swap.
struct InterleavedLedger {
    inner: InMemoryBookingStore,
    competitor: OrderStatus,
    fired: AtomicBool,
}

impl InterleavedLedger {
    fn new(inner: InMemoryBookingStore, competitor: OrderStatus) -> Self {
        Self {
            inner,
            competitor,
            fired: AtomicBool::new(false),
        }
    }
}

impl ReservationLedger for InterleavedLedger {
    fn reserve_seats(&self, draft: OrderDraft) -> BookingFuture<'_, Order> {
        self.inner.reserve_seats(draft)
    }

    fn transition_order(
        &self,
        order_id: OrderId,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> BookingFuture<'_, TransitionOutcome> {
        Box::pin(async move {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let competing = self
                    .inner
                    .transition_order(order_id, self.competitor, at)
                    .await?;
                assert!(matches!(competing, TransitionOutcome::Applied { .. }));
            }
            self.inner.transition_order(order_id, to, at).await
        })
    }

    fn load_order(&self, order_id: OrderId) -> BookingFuture<'_, Option<Order>> {
        self.inner.load_order(order_id)
    }

    fn entries_for_schedule(&self, schedule_id: ScheduleId) -> BookingFuture<'_, Vec<OrderItem>> {
        self.inner.entries_for_schedule(schedule_id)
    }

    fn overdue_orders(&self, now: DateTime<Utc>, limit: usize) -> BookingFuture<'_, Vec<OrderId>> {
        self.inner.overdue_orders(now, limit)
    }

    fn reconcile_booked_seats(
        &self,
        schedule_id: Option<ScheduleId>,
    ) -> BookingFuture<'_, Vec<CounterDrift>> {
        self.inner.reconcile_booked_seats(schedule_id)
    }
}

fn service_with_competitor(cinema: &CinemaFixture, competitor: OrderStatus) -> OrderService {
    let mut env = cinema.service.environment().clone();
    env.ledger = Arc::new(InterleavedLedger::new(cinema.store.clone(), competitor));
    OrderService::new(env, cinema.service.config().clone())
}

#[tokio::test]
async fn payment_loses_to_expiry_committed_after_its_read() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();
    let service = service_with_competitor(&cinema, OrderStatus::Expired);

    // The callback reads the order as PENDING before the deadline; the expiry lands first.
    cinema.clock.advance(Duration::minutes(15) - Duration::seconds(1));
    let err = service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        BookingError::InvalidTransition {
            order_id: order.id,
            current: OrderStatus::Expired,
            requested: OrderStatus::Paid,
        }
    );
    let stored = cinema.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);
    assert!(stored.items.iter().all(|item| item.status == ItemStatus::Expired));
    assert_eq!(cinema.booked_seats(), 0);
    assert_eq!(cinema.store.active_entry_count(cinema.schedule.id), 0);
}

#[tokio::test]
async fn expiry_loses_to_payment_committed_after_its_read() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();
    let service = service_with_competitor(&cinema, OrderStatus::Paid);

    // The job reads the order as PENDING and overdue; the payment lands first.
    cinema.clock.advance(Duration::minutes(15));
    let outcome = service.expire_order(order.id).await.unwrap();

    assert_eq!(outcome, ExpiryOutcome::AlreadyFinal(OrderStatus::Paid));
    let stored = cinema.service.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Paid);
    assert!(stored.items.iter().all(|item| item.status == ItemStatus::Confirmed));
    assert_eq!(cinema.booked_seats(), 2);
    assert_eq!(cinema.store.active_entry_count(cinema.schedule.id), 2);
}

#[tokio::test]
async fn late_payment_racing_a_committed_payment_returns_the_paid_order() {
    let cinema = CinemaFixture::new().await;
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();
    let service = service_with_competitor(&cinema, OrderStatus::Paid);

    // Past the deadline this callback tries to expire, but an earlier callback already paid.
    cinema.clock.advance(Duration::minutes(15));
    let paid = service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap();

    assert_eq!(paid.status, OrderStatus::Paid);
    assert_eq!(cinema.booked_seats(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_payment_and_expiry_leave_one_terminal_state() {
    for _ in 0..20 {
        let cinema = CinemaFixture::new().await;
        let order = cinema
            .service
            .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
            .await
            .unwrap();
        cinema.clock.advance(Duration::minutes(15));

        let start = Arc::new(Barrier::new(2));
        let pay = {
            let service = cinema.service.clone();
            let start = Arc::clone(&start);
            tokio::spawn(async move {
                start.wait().await;
                service
                    .confirm_payment(PaymentConfirmation {
                        order_id: order.id,
                        success: true,
                    })
                    .await
            })
        };
        let expire = {
            let service = cinema.service.clone();
            let start = Arc::clone(&start);
            tokio::spawn(async move {
                start.wait().await;
                service.expire_order(order.id).await
            })
        };
        let paid = pay.await.unwrap();
        let expired = expire.await.unwrap().unwrap();

        // Past the deadline both callers drive the order to EXPIRED; exactly one applies it.
        let err = paid.unwrap_err();
        assert!(
            matches!(err, BookingError::HoldExpired { .. })
                || err
                    == BookingError::InvalidTransition {
                        order_id: order.id,
                        current: OrderStatus::Expired,
                        requested: OrderStatus::Paid,
                    },
            "unexpected payment error {err}"
        );
        assert!(matches!(
            expired,
            ExpiryOutcome::Expired { released: 2 } | ExpiryOutcome::AlreadyFinal(OrderStatus::Expired)
        ));
        let stored = cinema.service.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Expired);
        assert_eq!(cinema.booked_seats(), 0);
        assert_eq!(cinema.store.active_entry_count(cinema.schedule.id), 0);
    }
}

#[tokio::test]
async fn enqueue_failure_still_returns_the_order() {
    let cinema = CinemaFixture::new().await;
    cinema.queue.fail_next_enqueues(1);

    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A9"]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(cinema.queue.get_job(order.id).await.unwrap().is_none());
    assert_eq!(cinema.booked_seats(), 1);
}

#[tokio::test]
async fn transient_ledger_failure_holds_nothing() {
    let cinema = CinemaFixture::new().await;
    cinema.store.fail_next(1);

    let err = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(cinema.booked_seats(), 0);
    assert!(cinema.queue.jobs().is_empty());
}

trait ClockNow {
    fn clock_now(&self) -> chrono::DateTime<chrono::Utc>;
}

impl ClockNow for CinemaFixture {
    fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        use cinema_booking_core::environment::Clock;
        self.clock.now()
    }
}
