//! In-memory expiry queue with leases.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use chrono::{DateTime, Utc};
use cinema_booking_core::expiry::{ExpiryJob, ExpiryQueue, JobStatus};
use cinema_booking_core::{BookingError, BookingFuture, OrderId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    job: ExpiryJob,
    leased_until: Option<DateTime<Utc>>,
}

/// In-memory [`ExpiryQueue`].
///
/// Leases behave like the PostgreSQL queue: a claimed job is skipped by later
/// claims until its lease runs out, which lets tests simulate a crashed worker by
/// simply never completing a job.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExpiryQueue {
    jobs: Arc<Mutex<HashMap<OrderId, Entry>>>,
    enqueue_faults: Arc<AtomicUsize>,
}

impl InMemoryExpiryQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` enqueues fail with a transient error.
    pub fn fail_next_enqueues(&self, n: usize) {
        self.enqueue_faults.store(n, Ordering::SeqCst);
    }

    /// Snapshot of every job, ordered by due time.
    #[must_use]
    pub fn jobs(&self) -> Vec<ExpiryJob> {
        let mut jobs: Vec<ExpiryJob> = self.lock().values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|job| job.run_at);
        jobs
    }

    /// Jobs in the dead state.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<ExpiryJob> {
        self.jobs()
            .into_iter()
            .filter(|job| job.status == JobStatus::Dead)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OrderId, Entry>> {
        self.jobs.lock().unwrap()
    }

    /// Apply `apply` if `claimed` is still the job's current claim.
    fn update_claim(&self, claimed: &ExpiryJob, apply: impl FnOnce(&mut Entry)) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&claimed.order_id) {
            Some(entry)
                if entry.job.status == JobStatus::Pending
                    && entry.job.attempts == claimed.attempts =>
            {
                apply(entry);
                true
            }
            _ => false,
        }
    }
}

impl ExpiryQueue for InMemoryExpiryQueue {
    fn enqueue(&self, order_id: OrderId, fire_at: DateTime<Utc>) -> BookingFuture<'_, ()> {
        Box::pin(async move {
            if self
                .enqueue_faults
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BookingError::TransientStore(
                    "injected fault: queue unavailable".to_string(),
                ));
            }
            self.lock().entry(order_id).or_insert_with(|| Entry {
                job: ExpiryJob::new(order_id, fire_at),
                leased_until: None,
            });
            Ok(())
        })
    }

    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> BookingFuture<'_, Vec<ExpiryJob>> {
        Box::pin(async move {
            let lease = chrono::Duration::from_std(lease)
                .map_err(|e| BookingError::InvalidRequest(format!("invalid lease: {e}")))?;
            let mut jobs = self.lock();

            let mut due: Vec<&mut Entry> = jobs
                .values_mut()
                .filter(|e| {
                    e.job.status == JobStatus::Pending
                        && e.job.run_at <= now
                        && e.leased_until.is_none_or(|until| until <= now)
                })
                .collect();
            due.sort_by_key(|e| (e.job.run_at, e.job.order_id));

            Ok(due
                .into_iter()
                .take(limit)
                .map(|entry| {
                    entry.job.attempts += 1;
                    entry.leased_until = Some(now + lease);
                    entry.job.clone()
                })
                .collect())
        })
    }

    fn complete(&self, claimed: &ExpiryJob) -> BookingFuture<'_, bool> {
        let applied = self.update_claim(claimed, |entry| {
            entry.job.status = JobStatus::Done;
            entry.leased_until = None;
        });
        Box::pin(async move { Ok(applied) })
    }

    fn retry_at(
        &self,
        claimed: &ExpiryJob,
        run_at: DateTime<Utc>,
        error: String,
    ) -> BookingFuture<'_, bool> {
        let applied = self.update_claim(claimed, |entry| {
            entry.job.run_at = run_at;
            entry.job.last_error = Some(error);
            entry.leased_until = None;
        });
        Box::pin(async move { Ok(applied) })
    }

    fn reschedule(&self, claimed: &ExpiryJob, run_at: DateTime<Utc>) -> BookingFuture<'_, bool> {
        let applied = self.update_claim(claimed, |entry| {
            entry.job.run_at = run_at;
            entry.job.attempts = entry.job.attempts.saturating_sub(1);
            entry.leased_until = None;
        });
        Box::pin(async move { Ok(applied) })
    }

    fn dead_letter(&self, claimed: &ExpiryJob, error: String) -> BookingFuture<'_, bool> {
        let applied = self.update_claim(claimed, |entry| {
            entry.job.status = JobStatus::Dead;
            entry.job.last_error = Some(error);
            entry.leased_until = None;
        });
        Box::pin(async move { Ok(applied) })
    }

    fn get_job(&self, order_id: OrderId) -> BookingFuture<'_, Option<ExpiryJob>> {
        Box::pin(async move { Ok(self.lock().get(&order_id).map(|e| e.job.clone())) })
    }

    fn pending_count(&self) -> BookingFuture<'_, u64> {
        Box::pin(async move {
            let pending = self
                .lock()
                .values()
                .filter(|e| e.job.status == JobStatus::Pending)
                .count();
            Ok(u64::try_from(pending).unwrap_or(u64::MAX))
        })
    }
}
