//! Durable delayed jobs that release unpaid holds.
//!
//! One job per order, due at the order's `expires_at`. Delivery is at-least-once:
//! a claimed job is leased, and a worker that dies before completing it loses the
//! lease so another worker picks the job up again. Handlers must therefore be
//! idempotent, which the PENDING compare-and-swap in the ledger provides.

use crate::BookingFuture;
use crate::types::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Queue status of an expiry job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to run (possibly leased by a worker)
    Pending,
    /// Handled successfully
    Done,
    /// Gave up after repeated failures; needs operator attention
    Dead,
}

impl JobStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "dead" => Ok(Self::Dead),
            other => Err(format!("Invalid job status: {other}")),
        }
    }
}

/// A scheduled expiry for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryJob {
    /// Order to expire
    pub order_id: OrderId,
    /// When the job becomes due (initially the order's `expires_at`)
    pub run_at: DateTime<Utc>,
    /// Number of times the job has been claimed; identifies the current claim
    pub attempts: u32,
    /// Queue status
    pub status: JobStatus,
    /// Last failure message
    pub last_error: Option<String>,
}

impl ExpiryJob {
    /// A fresh pending job due at `run_at`.
    #[must_use]
    pub const fn new(order_id: OrderId, run_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            run_at,
            attempts: 0,
            status: JobStatus::Pending,
            last_error: None,
        }
    }
}

/// Durable delayed-job queue for order expiry.
pub trait ExpiryQueue: Send + Sync {
    /// Schedule the expiry of `order_id` at `fire_at`.
    ///
    /// Idempotent per order: enqueuing an order that already has a job leaves the
    /// existing job unchanged.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn enqueue(&self, order_id: OrderId, fire_at: DateTime<Utc>) -> BookingFuture<'_, ()>;

    /// Claim up to `limit` pending jobs due at or before `now`.
    ///
    /// Claimed jobs are invisible to other claimers until `now + lease` and have
    /// their `attempts` incremented.
    ///
    /// # Errors
    ///
    /// Returns a store error if the claim fails.
    fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> BookingFuture<'_, Vec<ExpiryJob>>;

    /// Mark a claimed job done.
    ///
    /// The bookkeeping calls below act on one claim, identified by the job's
    /// `order_id` and `attempts` as returned from [`ExpiryQueue::claim_due`]. If the
    /// job has since been claimed again, finished or dead-lettered, the call changes
    /// nothing and returns `false`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn complete(&self, claimed: &ExpiryJob) -> BookingFuture<'_, bool>;

    /// Put a failed job back to run at `run_at`, recording the failure.
    ///
    /// The claim that failed still counts as an attempt.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn retry_at(
        &self,
        claimed: &ExpiryJob,
        run_at: DateTime<Utc>,
        error: String,
    ) -> BookingFuture<'_, bool>;

    /// Move a job that was delivered early to `run_at`.
    ///
    /// The claim is not counted as an attempt, so early deliveries never exhaust
    /// the retry budget.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn reschedule(&self, claimed: &ExpiryJob, run_at: DateTime<Utc>) -> BookingFuture<'_, bool>;

    /// Give up on a job.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails.
    fn dead_letter(&self, claimed: &ExpiryJob, error: String) -> BookingFuture<'_, bool>;

    /// Load a job regardless of status.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn get_job(&self, order_id: OrderId) -> BookingFuture<'_, Option<ExpiryJob>>;

    /// Number of jobs still pending.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails.
    fn pending_count(&self) -> BookingFuture<'_, u64>;
}
