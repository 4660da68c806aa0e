//! Mapping from `sqlx` errors to [`BookingError`].

use cinema_booking_core::BookingError;

/// `serialization_failure`, `deadlock_detected`, `admin_shutdown`, `cannot_connect_now`
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "57P01", "57P03"];

/// Unique index that allows one active entry per (schedule, seat).
pub(crate) const ACTIVE_SEAT_INDEX: &str = "order_items_active_seat_key";

/// Unique constraint on order numbers.
pub(crate) const ORDER_NUMBER_KEY: &str = "orders_order_number_key";

/// Classify a database failure.
///
/// Connection-level problems, serialization failures and deadlocks are
/// [`BookingError::TransientStore`]; everything else is [`BookingError::Storage`].
pub(crate) fn storage_error(context: &str, err: sqlx::Error) -> BookingError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&&*code)),
        _ => false,
    };

    if transient {
        BookingError::TransientStore(format!("{context}: {err}"))
    } else {
        BookingError::Storage(format!("{context}: {err}"))
    }
}

/// Whether `err` is a unique violation of `constraint`.
pub(crate) fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Decode failure for a column whose stored value no longer parses.
pub(crate) fn corrupt(column: &str, detail: impl std::fmt::Display) -> BookingError {
    BookingError::Storage(format!("invalid {column} in database: {detail}"))
}
