//! # Cinema Booking Core
//!
//! Domain types, state machines and storage abstractions for the cinema seat
//! reservation engine.
//!
//! ## Core Concepts
//!
//! - **Schedule**: one showtime of a movie in a studio, with a cached `booked_seats` counter
//! - **Order**: a checkout attempt holding 1..N seats for one schedule until `expires_at`
//! - **Order item**: the per-seat reservation ledger entry; the authority on who holds a seat
//! - **Expiry job**: a delayed unit of work that releases an unpaid hold
//!
//! ## Guarantees
//!
//! - At most one PENDING or CONFIRMED entry exists per `(schedule, seat)` at any instant
//! - An order leaves PENDING exactly once; terminal states never change
//! - `booked_seats` moves only inside the transaction that changes the entries it counts
//!
//! ## Abstractions
//!
//! Storage is expressed as traits so the same business logic runs against
//! PostgreSQL in production and in-memory doubles in tests:
//!
//! - [`ledger::ReservationLedger`]: atomic seat reservation and order transitions
//! - [`registry::ScheduleRegistry`]: movies, studios, seats and schedules
//! - [`expiry::ExpiryQueue`]: durable delayed expiry jobs
//! - [`environment::Clock`] and [`environment::OrderNumberGenerator`]: injected dependencies

use std::future::Future;
use std::pin::Pin;

pub mod config;
pub mod error;
pub mod expiry;
pub mod ledger;
pub mod registry;
pub mod types;

pub use config::BookingConfig;
pub use error::{BookingError, Result};
pub use types::*;

/// Boxed future returned by the storage traits.
///
/// The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they can
/// be used as trait objects (`Arc<dyn ReservationLedger>`).
pub type BookingFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Environment traits for dependency injection
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Hold deadlines, payment cut-offs and expiry jobs are all computed from the
    /// injected clock, never from `Utc::now()` directly.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Produces human-readable order numbers (`ORD-<yyyymmdd>-<suffix>`).
    ///
    /// Uniqueness is enforced by the store, not the generator.
    pub trait OrderNumberGenerator: Send + Sync {
        /// Generate an order number for an order created at `at`
        fn generate(&self, at: DateTime<Utc>) -> String;
    }
}
