//! # Cinema Booking Runtime
//!
//! Business services that run on top of the storage traits from
//! `cinema-booking-core`.
//!
//! ## Core Components
//!
//! - **`OrderService`**: create, pay, cancel and expire orders
//! - **`ExpiryWorker`**: polls the expiry queue and sweeps overdue holds
//! - **`CounterReconciler`**: recomputes `booked_seats` from the ledger
//!
//! ## Example
//!
//! ```ignore
//! use cinema_booking_runtime::orders::{BookingEnvironment, CreateOrder, OrderService};
//!
//! let service = OrderService::new(env, BookingConfig::from_env());
//! let order = service
//!     .create_order(CreateOrder {
//!         user_id,
//!         schedule_id,
//!         seat_ids: vec![a12, a13],
//!         payment_method: PaymentMethod::EWallet,
//!     })
//!     .await?;
//! ```

/// Expiry worker for unpaid holds
pub mod expiry;

/// Prometheus metrics for observability
pub mod metrics;

/// Random order number generation
pub mod order_numbers;

/// Order lifecycle service
pub mod orders;

/// Booked-seat counter reconciliation
pub mod reconciler;

/// Retry logic with exponential backoff
pub mod retry;

pub use expiry::{ExpiryWorker, ExpiryWorkerConfig, WorkerReport};
pub use order_numbers::RandomOrderNumbers;
pub use orders::{
    BookingEnvironment, CreateOrder, ExpiryOutcome, OrderService, PaymentConfirmation,
};
pub use reconciler::{CounterReconciler, ReconcilerConfig};
pub use retry::RetryPolicy;
