//! Prometheus metrics for the booking engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `booking_orders_total{status}` - Orders by lifecycle event (reserved, paid, failed, cancelled, expired)
//! - `booking_seats_reserved_total` - Seats placed on hold
//! - `booking_seats_released_total{reason}` - Seats given back (failed, cancelled, expired)
//! - `booking_seats_sold_total` - Seats confirmed by payment
//! - `booking_seat_conflicts_total` - Reservations rejected with `SeatUnavailable`
//! - `booking_late_payments_total` - Successful payments that arrived after the deadline
//! - `booking_transition_conflicts_total` - Transitions lost to a different terminal state
//! - `booking_expiry_enqueue_failures_total` - Holds committed without an expiry job
//! - `booking_expiry_jobs_total{outcome}` - Expiry jobs by outcome
//! - `booking_expiry_dead_letters_total` - Expiry jobs that were given up on
//! - `booking_counter_drift_total` - Schedule counters corrected by the reconciler
//! - `retry_attempts_total`, `retry_successes_total`, `retry_exhausted_total`
//!
//! ## Gauges
//! - `booking_expiry_queue_pending` - Pending expiry jobs after the last worker pass
//!
//! ## Histograms
//! - `booking_reserve_duration_seconds` - Time to run the reservation transaction

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime. Registers metric descriptions first.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or a recorder is already installed.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    register_booking_metrics();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    tracing::info!(%addr, "Metrics exporter listening at http://{addr}/metrics");
    Ok(())
}

/// Register descriptions for every booking metric.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_booking_metrics() {
    describe_counter!(
        "booking_orders_total",
        "Orders by lifecycle event (reserved, paid, failed, cancelled, expired)"
    );
    describe_counter!("booking_seats_reserved_total", "Seats placed on hold");
    describe_counter!(
        "booking_seats_released_total",
        "Seats released back to their schedule, by reason"
    );
    describe_counter!("booking_seats_sold_total", "Seats confirmed by payment");
    describe_counter!(
        "booking_seat_conflicts_total",
        "Reservation attempts rejected because a seat was already held"
    );
    describe_counter!(
        "booking_late_payments_total",
        "Successful payment confirmations that arrived after the hold deadline"
    );
    describe_counter!(
        "booking_transition_conflicts_total",
        "Order transitions that lost to a different terminal state"
    );
    describe_histogram!(
        "booking_reserve_duration_seconds",
        "Time taken by the seat reservation transaction"
    );

    describe_counter!(
        "booking_expiry_enqueue_failures_total",
        "Orders committed whose expiry job could not be enqueued"
    );
    describe_counter!(
        "booking_expiry_jobs_total",
        "Expiry jobs handled, by outcome (expired, skipped, rescheduled, retried, swept, lease_lost)"
    );
    describe_counter!(
        "booking_expiry_dead_letters_total",
        "Expiry jobs moved to the dead state"
    );
    describe_gauge!(
        "booking_expiry_queue_pending",
        "Pending expiry jobs after the last worker pass"
    );

    describe_counter!(
        "booking_counter_drift_total",
        "Schedule booked_seats counters corrected by the reconciler"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted their retries"
    );

    tracing::info!("Booking metrics registered");
}

/// Order lifecycle metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record a committed reservation.
    pub fn record_reserved(seat_count: usize, duration: Duration) {
        counter!("booking_orders_total", "status" => "reserved").increment(1);
        counter!("booking_seats_reserved_total").increment(seat_count as u64);
        histogram!("booking_reserve_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a reservation rejected for conflicting seats.
    pub fn record_seat_conflict() {
        counter!("booking_seat_conflicts_total").increment(1);
    }

    /// Record a payment that confirmed its seats.
    pub fn record_paid(seat_count: usize) {
        counter!("booking_orders_total", "status" => "paid").increment(1);
        counter!("booking_seats_sold_total").increment(seat_count as u64);
    }

    /// Record a transition that released seats.
    ///
    /// `status` is the lowercase terminal state (`failed`, `cancelled`, `expired`).
    pub fn record_released(status: &'static str, released: u32) {
        counter!("booking_orders_total", "status" => status).increment(1);
        counter!("booking_seats_released_total", "reason" => status).increment(u64::from(released));
    }

    /// Record a successful payment that arrived too late.
    pub fn record_late_payment() {
        counter!("booking_late_payments_total").increment(1);
    }

    /// Record a transition that lost to another terminal state.
    pub fn record_transition_conflict() {
        counter!("booking_transition_conflicts_total").increment(1);
    }
}

/// Expiry scheduler metrics recorder.
pub struct ExpiryMetrics;

impl ExpiryMetrics {
    /// Record a hold committed without an expiry job.
    pub fn record_enqueue_failure() {
        counter!("booking_expiry_enqueue_failures_total").increment(1);
    }

    /// Record a handled job.
    pub fn record_job(outcome: &'static str) {
        counter!("booking_expiry_jobs_total", "outcome" => outcome).increment(1);
    }

    /// Record a dead-lettered job.
    pub fn record_dead_letter() {
        counter!("booking_expiry_dead_letters_total").increment(1);
    }

    /// Record the queue depth.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending(pending: u64) {
        gauge!("booking_expiry_queue_pending").set(pending as f64);
    }
}

/// Counter reconciler metrics recorder.
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record corrected counters.
    pub fn record_drift(corrected: usize) {
        counter!("booking_counter_drift_total").increment(corrected as u64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
