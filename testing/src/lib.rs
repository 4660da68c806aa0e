//! # Cinema Booking Testing
//!
//! Testing utilities for the cinema booking engine.
//!
//! This crate provides:
//! - [`InMemoryBookingStore`]: registry and reservation ledger behind one mutex
//! - [`InMemoryExpiryQueue`]: leased delayed-job queue
//! - Controllable clocks and deterministic order numbers
//! - [`CinemaFixture`]: a studio, a schedule and a wired-up `OrderService`
//! - proptest strategies for booking operation sequences
//!
//! ## Example
//!
//! ```ignore
//! use cinema_booking_testing::CinemaFixture;
//!
//! #[tokio::test]
//! async fn reserve_two_seats() {
//!     let cinema = CinemaFixture::new().await;
//!     let order = cinema
//!         .service
//!         .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
//!         .await
//!         .unwrap();
//!     assert_eq!(cinema.booked_seats(), 2);
//! }
//! ```

use chrono::{DateTime, Utc};
use cinema_booking_core::environment::{Clock, OrderNumberGenerator};

pub mod booking_store;
pub mod expiry_queue;
pub mod fixtures;

/// Mock implementations of environment traits.
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Poisoned locks only happen after a test already panicked

    use super::{Clock, DateTime, OrderNumberGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time.
    ///
    /// ```
    /// use cinema_booking_testing::mocks::FixedClock;
    /// use cinema_booking_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give another
    /// to the service under test.
    ///
    /// ```
    /// use cinema_booking_testing::mocks::ManualClock;
    /// use cinema_booking_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(15));
    /// assert_eq!(clock.now() - start, Duration::minutes(15));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward (or backward with a negative duration)
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Order numbers with a zero-padded counter suffix: `ORD-20250101-00000001`, ...
    #[derive(Debug)]
    pub struct SequentialOrderNumbers {
        next: AtomicU64,
    }

    impl SequentialOrderNumbers {
        /// Start counting from 1
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(1),
            }
        }
    }

    impl Default for SequentialOrderNumbers {
        fn default() -> Self {
            Self::new()
        }
    }

    impl OrderNumberGenerator for SequentialOrderNumbers {
        fn generate(&self, at: DateTime<Utc>) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("ORD-{}-{n:08}", at.format("%Y%m%d"))
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One step of a random booking session.
    #[derive(Debug, Clone)]
    pub enum BookingOp {
        /// Reserve seats by index into the studio layout
        Reserve(Vec<usize>),
        /// Pay the n-th order created so far (modulo count)
        Pay(usize),
        /// Report a failed payment for the n-th order
        Fail(usize),
        /// Cancel the n-th order
        Cancel(usize),
        /// Advance the clock by this many minutes, then run the expiry worker
        Elapse(u32),
    }

    /// Strategy for a seat selection of 1..=`max_seats` distinct indices below `seat_count`.
    pub fn seat_selection(seat_count: usize, max_seats: usize) -> impl Strategy<Value = Vec<usize>> {
        proptest::sample::subsequence((0..seat_count).collect::<Vec<_>>(), 1..=max_seats)
    }

    /// Strategy for a single booking operation.
    pub fn booking_op(seat_count: usize) -> impl Strategy<Value = BookingOp> {
        prop_oneof![
            4 => seat_selection(seat_count, 3).prop_map(BookingOp::Reserve),
            2 => any::<usize>().prop_map(BookingOp::Pay),
            1 => any::<usize>().prop_map(BookingOp::Fail),
            1 => any::<usize>().prop_map(BookingOp::Cancel),
            2 => (1u32..30).prop_map(BookingOp::Elapse),
        ]
    }
}

/// Install a `tracing` subscriber for test output, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use booking_store::InMemoryBookingStore;
pub use expiry_queue::InMemoryExpiryQueue;
pub use fixtures::CinemaFixture;
pub use mocks::{FixedClock, ManualClock, SequentialOrderNumbers, test_clock};
