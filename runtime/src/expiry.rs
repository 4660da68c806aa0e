//! Expiry worker: releases unpaid holds when their deadline passes.
//!
//! The worker polls the [`ExpiryQueue`] for due jobs and expires each order through
//! [`OrderService::expire_order`]. Jobs are leased while being handled, so a crashed
//! worker's jobs are redelivered once the lease runs out. Handling is idempotent:
//! an order that already left PENDING is simply marked done.
//!
//! A periodic overdue sweep expires PENDING orders past their deadline straight from
//! the ledger, which covers holds whose job was never enqueued.

use chrono::{DateTime, Utc};
use cinema_booking_core::environment::Clock;
use cinema_booking_core::expiry::{ExpiryJob, ExpiryQueue};
use cinema_booking_core::ledger::ReservationLedger;
use cinema_booking_core::{BookingError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::metrics::ExpiryMetrics;
use crate::orders::{ExpiryOutcome, OrderService};
use crate::retry::RetryPolicy;

/// Expiry worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryWorkerConfig {
    /// How often to poll for due jobs
    pub poll_interval: Duration,
    /// Maximum jobs claimed per poll
    pub batch_size: usize,
    /// How long a claimed job stays invisible to other workers
    pub lease: Duration,
    /// How often to sweep the ledger for overdue holds
    pub sweep_interval: Duration,
    /// Maximum orders expired per sweep
    pub sweep_limit: usize,
    /// Backoff for jobs that hit transient store errors
    pub retry: RetryPolicy,
}

impl Default for ExpiryWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            lease: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            sweep_limit: 500,
            retry: RetryPolicy::default(),
        }
    }
}

/// Tally of one worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Jobs claimed from the queue
    pub claimed: usize,
    /// Orders this pass expired
    pub expired: usize,
    /// Jobs whose order had already left PENDING (or no longer exists)
    pub skipped: usize,
    /// Jobs delivered before their order's deadline and moved to it
    pub rescheduled: usize,
    /// Jobs put back after a transient failure
    pub retried: usize,
    /// Jobs given up on
    pub dead_lettered: usize,
}

impl WorkerReport {
    /// Whether the pass did anything
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// Polls the expiry queue and expires overdue orders.
pub struct ExpiryWorker {
    service: OrderService,
    queue: Arc<dyn ExpiryQueue>,
    ledger: Arc<dyn ReservationLedger>,
    clock: Arc<dyn Clock>,
    config: ExpiryWorkerConfig,
}

impl ExpiryWorker {
    /// Create a worker sharing the service's queue, ledger and clock.
    #[must_use]
    pub fn new(service: OrderService, config: ExpiryWorkerConfig) -> Self {
        let env = service.environment();
        Self {
            queue: Arc::clone(&env.queue),
            ledger: Arc::clone(&env.ledger),
            clock: Arc::clone(&env.clock),
            service,
            config,
        }
    }

    /// Worker configuration.
    #[must_use]
    pub const fn config(&self) -> &ExpiryWorkerConfig {
        &self.config
    }

    /// Claim one batch of due jobs and handle each.
    ///
    /// Failures of individual jobs are absorbed into the report; a job whose
    /// bookkeeping write fails keeps its lease and is redelivered later.
    ///
    /// # Errors
    ///
    /// Returns an error only if the claim itself fails.
    pub async fn run_once(&self) -> Result<WorkerReport> {
        let now = self.clock.now();
        let jobs = self
            .queue
            .claim_due(now, self.config.batch_size, self.config.lease)
            .await?;

        let mut report = WorkerReport {
            claimed: jobs.len(),
            ..WorkerReport::default()
        };

        for job in jobs {
            let order_id = job.order_id;
            if let Err(err) = self.handle(job, now, &mut report).await {
                tracing::warn!(
                    order_id = %order_id,
                    error = %err,
                    "Failed to record expiry job outcome, job will be redelivered"
                );
            }
        }

        match self.queue.pending_count().await {
            Ok(pending) => ExpiryMetrics::record_pending(pending),
            Err(err) => tracing::debug!(error = %err, "Could not read expiry queue depth"),
        }

        Ok(report)
    }

    /// Expire PENDING orders past their deadline, independent of the queue.
    ///
    /// Returns the number of orders this sweep expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the overdue query fails.
    pub async fn sweep_overdue(&self) -> Result<usize> {
        let now = self.clock.now();
        let overdue = self
            .ledger
            .overdue_orders(now, self.config.sweep_limit)
            .await?;

        let mut expired = 0;
        for order_id in overdue {
            match self.service.expire_order(order_id).await {
                Ok(ExpiryOutcome::Expired { released }) => {
                    expired += 1;
                    ExpiryMetrics::record_job("swept");
                    tracing::info!(
                        order_id = %order_id,
                        released,
                        "Overdue sweep expired order"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(order_id = %order_id, error = %err, "Overdue sweep failed for order");
                }
            }
        }

        Ok(expired)
    }

    /// Poll until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.config.batch_size,
            "Expiry worker started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = poll.tick() => {
                    match self.run_once().await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                claimed = report.claimed,
                                expired = report.expired,
                                skipped = report.skipped,
                                rescheduled = report.rescheduled,
                                retried = report.retried,
                                dead_lettered = report.dead_lettered,
                                "Expiry pass completed"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "Expiry pass failed"),
                    }
                }
                _ = sweep.tick() => {
                    if let Err(err) = self.sweep_overdue().await {
                        tracing::warn!(error = %err, "Overdue sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiry worker stopped");
    }

    async fn handle(
        &self,
        job: ExpiryJob,
        now: DateTime<Utc>,
        report: &mut WorkerReport,
    ) -> Result<()> {
        let order_id = job.order_id;

        let recorded = match self.service.expire_order(order_id).await {
            Ok(ExpiryOutcome::Expired { .. }) => {
                report.expired += 1;
                ExpiryMetrics::record_job("expired");
                self.queue.complete(&job).await?
            }
            Ok(ExpiryOutcome::AlreadyFinal(status)) => {
                report.skipped += 1;
                ExpiryMetrics::record_job("skipped");
                tracing::debug!(order_id = %order_id, %status, "Order already final, expiry job is a no-op");
                self.queue.complete(&job).await?
            }
            Ok(ExpiryOutcome::Missing) => {
                report.skipped += 1;
                ExpiryMetrics::record_job("skipped");
                tracing::warn!(order_id = %order_id, "Expiry job for unknown order");
                self.queue.complete(&job).await?
            }
            Ok(ExpiryOutcome::NotYetDue(expires_at)) => {
                report.rescheduled += 1;
                ExpiryMetrics::record_job("rescheduled");
                self.queue.reschedule(&job, expires_at).await?
            }
            Err(err) if err.is_retryable() && !self.config.retry.is_exhausted(job.attempts) => {
                let delay = self
                    .config
                    .retry
                    .delay_for_attempt(job.attempts.saturating_sub(1));
                let run_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(now);
                report.retried += 1;
                ExpiryMetrics::record_job("retried");
                tracing::warn!(
                    order_id = %order_id,
                    attempts = job.attempts,
                    retry_at = %run_at,
                    error = %err,
                    "Expiry failed, retrying"
                );
                self.queue.retry_at(&job, run_at, err.to_string()).await?
            }
            Err(err) => {
                report.dead_lettered += 1;
                self.dead_letter(&job, &err).await?
            }
        };

        if !recorded {
            ExpiryMetrics::record_job("lease_lost");
            tracing::warn!(
                order_id = %order_id,
                attempts = job.attempts,
                "Expiry job was claimed again before this outcome was recorded"
            );
        }
        Ok(())
    }

    async fn dead_letter(&self, job: &ExpiryJob, err: &BookingError) -> Result<bool> {
        let recorded = self.queue.dead_letter(job, err.to_string()).await?;
        if recorded {
            ExpiryMetrics::record_dead_letter();
            tracing::error!(
                order_id = %job.order_id,
                attempts = job.attempts,
                retryable = err.is_retryable(),
                error = %err,
                "Expiry job dead-lettered, hold requires manual release"
            );
        }
        Ok(recorded)
    }
}
