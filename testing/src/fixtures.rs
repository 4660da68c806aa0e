//! Ready-made cinema for runtime tests.

#![allow(clippy::expect_used)] // Fixture setup failures should abort the test
#![allow(clippy::missing_panics_doc)]

use chrono::{NaiveDate, NaiveTime};
use cinema_booking_core::environment::Clock;
use cinema_booking_core::registry::ScheduleRegistry;
use cinema_booking_core::{
    BookingConfig, Movie, Money, NewSchedule, PaymentMethod, Schedule, Seat, SeatId, Studio,
    UserId,
};
use cinema_booking_runtime::{
    BookingEnvironment, CounterReconciler, CreateOrder, ExpiryWorker, ExpiryWorkerConfig,
    OrderService, ReconcilerConfig,
};
use std::sync::Arc;

use crate::booking_store::InMemoryBookingStore;
use crate::expiry_queue::InMemoryExpiryQueue;
use crate::mocks::{ManualClock, SequentialOrderNumbers, test_clock};

/// One studio, one schedule and an `OrderService` wired to in-memory stores.
///
/// The default layout is rows `A` and `B` with seats 1 to 12, a 50.00 ticket and
/// a 15 minute hold. The clock starts at 2025-01-01 00:00 UTC and only moves when
/// the test calls [`ManualClock::advance`].
pub struct CinemaFixture {
    /// Registry and ledger
    pub store: InMemoryBookingStore,
    /// Expiry queue
    pub queue: InMemoryExpiryQueue,
    /// Shared clock
    pub clock: ManualClock,
    /// Service under test
    pub service: OrderService,
    /// The movie being shown
    pub movie: Movie,
    /// The studio
    pub studio: Studio,
    /// The schedule every request targets
    pub schedule: Schedule,
    /// Studio seats ordered by row then number
    pub seats: Vec<Seat>,
    /// A customer to place orders with
    pub customer: UserId,
}

impl CinemaFixture {
    /// Default cinema with the default booking policy.
    pub async fn new() -> Self {
        Self::with_layout(&["A", "B"], 12, BookingConfig::default()).await
    }

    /// Cinema with `rows` × `seats_per_row` seats and the given policy.
    pub async fn with_layout(rows: &[&str], seats_per_row: u32, config: BookingConfig) -> Self {
        let store = InMemoryBookingStore::new();
        let queue = InMemoryExpiryQueue::new();
        let clock = ManualClock::new(test_clock().now());

        let movie = store
            .create_movie(Movie::new("Interstellar", 169))
            .await
            .expect("create movie");
        let layout = rows
            .iter()
            .flat_map(|row| (1..=seats_per_row).map(move |n| ((*row).to_string(), n)))
            .collect();
        let studio = store
            .create_studio("Studio 1".to_string(), layout)
            .await
            .expect("create studio");
        let schedule = store
            .create_schedule(NewSchedule {
                movie_id: movie.id,
                studio_id: studio.id,
                date: NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
                start_time: NaiveTime::from_hms_opt(19, 0, 0).expect("valid time"),
                end_time: NaiveTime::from_hms_opt(21, 49, 0).expect("valid time"),
                price: Money::from_cents(5_000),
            })
            .await
            .expect("create schedule");
        let seats = store.studio_seats(studio.id).await.expect("studio seats");

        let env = BookingEnvironment {
            registry: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            queue: Arc::new(queue.clone()),
            clock: Arc::new(clock.clone()),
            order_numbers: Arc::new(SequentialOrderNumbers::new()),
        };

        Self {
            service: OrderService::new(env, config),
            store,
            queue,
            clock,
            movie,
            studio,
            schedule,
            seats,
            customer: UserId::new(),
        }
    }

    /// Seat id for a label such as `A12`.
    #[must_use]
    pub fn seat(&self, label: &str) -> SeatId {
        self.seats
            .iter()
            .find(|seat| seat.label() == label)
            .map(|seat| seat.id)
            .expect("seat label exists in fixture layout")
    }

    /// Booking request for the fixture schedule.
    #[must_use]
    pub fn request(&self, user_id: UserId, labels: &[&str]) -> CreateOrder {
        CreateOrder {
            user_id,
            schedule_id: self.schedule.id,
            seat_ids: labels.iter().map(|label| self.seat(label)).collect(),
            payment_method: PaymentMethod::EWallet,
        }
    }

    /// Expiry worker sharing the fixture's stores and clock.
    #[must_use]
    pub fn expiry_worker(&self, config: ExpiryWorkerConfig) -> ExpiryWorker {
        ExpiryWorker::new(self.service.clone(), config)
    }

    /// Counter reconciler over the fixture's ledger.
    #[must_use]
    pub fn reconciler(&self) -> CounterReconciler {
        CounterReconciler::new(Arc::new(self.store.clone()), ReconcilerConfig::default())
    }

    /// Current cached counter of the fixture schedule.
    #[must_use]
    pub fn booked_seats(&self) -> u32 {
        self.store
            .booked_seats(self.schedule.id)
            .expect("fixture schedule exists")
    }
}
