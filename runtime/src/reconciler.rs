//! Counter reconciler: keeps `schedule.booked_seats` honest.
//!
//! Increments and decrements already happen inside the ledger transactions that
//! change the entries. This component is the safety net: it recomputes the counter
//! from PENDING/CONFIRMED entries and writes back any drift it finds.

use cinema_booking_core::ledger::ReservationLedger;
use cinema_booking_core::{BookingError, CounterDrift, Result, ScheduleId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::metrics::ReconcilerMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Time between full passes
    pub interval: Duration,
    /// Backoff for transient failures within a pass
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(10))
                .build(),
        }
    }
}

/// Recomputes schedule counters from the ledger.
pub struct CounterReconciler {
    ledger: Arc<dyn ReservationLedger>,
    config: ReconcilerConfig,
}

impl CounterReconciler {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(ledger: Arc<dyn ReservationLedger>, config: ReconcilerConfig) -> Self {
        Self { ledger, config }
    }

    /// Correct drift for one schedule, or every schedule when `schedule_id` is `None`.
    ///
    /// Returns the corrections that were applied.
    ///
    /// # Errors
    ///
    /// Returns a store error if the pass fails after retries.
    pub async fn reconcile(&self, schedule_id: Option<ScheduleId>) -> Result<Vec<CounterDrift>> {
        let drifts = retry_with_predicate(
            &self.config.retry,
            || self.ledger.reconcile_booked_seats(schedule_id),
            BookingError::is_retryable,
        )
        .await?;

        for drift in &drifts {
            tracing::warn!(
                schedule_id = %drift.schedule_id,
                cached = drift.cached,
                actual = drift.actual,
                "Corrected booked_seats drift"
            );
        }
        ReconcilerMetrics::record_drift(drifts.len());

        Ok(drifts)
    }

    /// Reconcile every schedule on `interval` until `shutdown` turns `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            "Counter reconciler started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile(None).await {
                        Ok(drifts) if drifts.is_empty() => tracing::debug!("No counter drift found"),
                        Ok(drifts) => tracing::info!(corrected = drifts.len(), "Reconciliation pass corrected counters"),
                        Err(err) => tracing::error!(error = %err, "Reconciliation pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Counter reconciler stopped");
    }
}
