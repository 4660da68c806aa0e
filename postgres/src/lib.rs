//! `PostgreSQL` storage for the cinema booking engine.
//!
//! This crate implements the storage traits from `cinema-booking-core` on top of
//! sqlx:
//!
//! - [`PostgresBookingStore`]: schedule registry and reservation ledger
//! - [`PostgresExpiryQueue`]: durable, leased delayed jobs for hold expiry
//! - [`migrate`]: schema installation from the bundled migrations
//!
//! # Example
//!
//! ```ignore
//! use cinema_booking_postgres::{PostgresBookingStore, PostgresExpiryQueue};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect("postgres://localhost/cinema").await?;
//!     store.migrate().await?;
//!     let queue = PostgresExpiryQueue::new(store.pool().clone());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use cinema_booking_core::{BookingError, Result};
use sqlx::PgPool;

mod error;
pub mod expiry_queue;
mod rows;
pub mod store;

pub use expiry_queue::PostgresExpiryQueue;
pub use store::PostgresBookingStore;

/// Apply the bundled migrations to `pool`.
///
/// # Errors
///
/// Returns [`BookingError::Storage`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| BookingError::Storage(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
