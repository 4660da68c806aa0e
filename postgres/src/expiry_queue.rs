//! `PostgreSQL` expiry queue.
//!
//! Jobs live in `order_expiry_jobs`, one row per order. Workers claim due rows with
//! `FOR UPDATE SKIP LOCKED` and stamp a lease on them, so concurrent workers never
//! claim the same job and a crashed worker's jobs come back once the lease lapses.
//!
//! Every claim bumps `attempts`, so `(order_id, attempts)` names one delivery. Writes
//! that finish a delivery match on it, and a worker that outlived its lease cannot
//! overwrite the job another worker has claimed since.
//!
//! Dead jobs stay in the table for operators: [`PostgresExpiryQueue::dead_letters`]
//! lists them and [`PostgresExpiryQueue::requeue`] puts one back in line.

use chrono::{DateTime, Utc};
use cinema_booking_core::expiry::{ExpiryJob, ExpiryQueue};
use cinema_booking_core::{BookingError, BookingFuture, OrderId, Result};
use sqlx::PgPool;
use std::time::Duration;

use crate::error::storage_error;
use crate::rows::{JobRow, to_i32};

const JOB_COLUMNS: &str = "order_id, run_at, attempts, status, last_error";

/// Matches a job only while the claim that returned it is still current.
const CURRENT_CLAIM: &str = "order_id = $1 AND attempts = $2 AND status = 'pending'";

/// Durable [`ExpiryQueue`] backed by a `PgPool`.
#[derive(Clone, Debug)]
pub struct PostgresExpiryQueue {
    pool: PgPool,
}

impl PostgresExpiryQueue {
    /// Create a queue on an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Dead jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<ExpiryJob>> {
        sqlx::query_as::<_, JobRow>(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM order_expiry_jobs
            WHERE status = 'dead'
            ORDER BY updated_at ASC
            LIMIT $1
            "
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("list dead expiry jobs", e))?
        .into_iter()
        .map(ExpiryJob::try_from)
        .collect()
    }

    /// Move a dead job back to pending with a fresh attempt budget.
    ///
    /// Returns `false` if the job does not exist or is not dead.
    ///
    /// # Errors
    ///
    /// Returns a store error if the update fails.
    pub async fn requeue(&self, order_id: OrderId, run_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE order_expiry_jobs
            SET status = 'pending', run_at = $2, attempts = 0, leased_until = NULL, updated_at = now()
            WHERE order_id = $1 AND status = 'dead'
            ",
        )
        .bind(order_id.as_uuid())
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("requeue expiry job", e))?;

        let requeued = result.rows_affected() > 0;
        if requeued {
            tracing::info!(order_id = %order_id, run_at = %run_at, "Dead expiry job requeued");
            metrics::counter!("booking_expiry_requeued_total").increment(1);
        }
        Ok(requeued)
    }

    fn claim_params(claimed: &ExpiryJob) -> Result<(OrderId, i32)> {
        Ok((claimed.order_id, to_i32("attempts", claimed.attempts)?))
    }
}

impl ExpiryQueue for PostgresExpiryQueue {
    fn enqueue(&self, order_id: OrderId, fire_at: DateTime<Utc>) -> BookingFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO order_expiry_jobs (order_id, run_at)
                VALUES ($1, $2)
                ON CONFLICT (order_id) DO NOTHING
                ",
            )
            .bind(order_id.as_uuid())
            .bind(fire_at)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("enqueue expiry job", e))?;
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
            let leased_until = chrono::Duration::from_std(lease)
                .ok()
                .and_then(|lease| now.checked_add_signed(lease))
                .ok_or_else(|| BookingError::InvalidRequest("invalid lease".to_string()))?;

            let mut jobs = sqlx::query_as::<_, JobRow>(&format!(
                r"
                UPDATE order_expiry_jobs AS j
                SET attempts = j.attempts + 1, leased_until = $3, updated_at = now()
                FROM (
                    SELECT order_id
                    FROM order_expiry_jobs
                    WHERE status = 'pending'
                      AND run_at <= $1
                      AND (leased_until IS NULL OR leased_until <= $1)
                    ORDER BY run_at, order_id
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                ) AS due
                WHERE j.order_id = due.order_id
                RETURNING j.order_id, j.run_at, j.attempts, j.status, j.last_error
                "
            ))
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(leased_until)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("claim expiry jobs", e))?
            .into_iter()
            .map(ExpiryJob::try_from)
            .collect::<Result<Vec<_>>>()?;

            jobs.sort_by_key(|job| (job.run_at, job.order_id));
            Ok(jobs)
        })
    }

    fn complete(&self, claimed: &ExpiryJob) -> BookingFuture<'_, bool> {
        let params = Self::claim_params(claimed);
        Box::pin(async move {
            let (order_id, attempts) = params?;
            let result = sqlx::query(&format!(
                r"
                UPDATE order_expiry_jobs
                SET status = 'done', leased_until = NULL, updated_at = now()
                WHERE {CURRENT_CLAIM}
                "
            ))
            .bind(order_id.as_uuid())
            .bind(attempts)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("complete expiry job", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn retry_at(
        &self,
        claimed: &ExpiryJob,
        run_at: DateTime<Utc>,
        error: String,
    ) -> BookingFuture<'_, bool> {
        let params = Self::claim_params(claimed);
        Box::pin(async move {
            let (order_id, attempts) = params?;
            let result = sqlx::query(&format!(
                r"
                UPDATE order_expiry_jobs
                SET run_at = $3, last_error = $4, leased_until = NULL, updated_at = now()
                WHERE {CURRENT_CLAIM}
                "
            ))
            .bind(order_id.as_uuid())
            .bind(attempts)
            .bind(run_at)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("retry expiry job", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn reschedule(&self, claimed: &ExpiryJob, run_at: DateTime<Utc>) -> BookingFuture<'_, bool> {
        let params = Self::claim_params(claimed);
        Box::pin(async move {
            let (order_id, attempts) = params?;
            let result = sqlx::query(&format!(
                r"
                UPDATE order_expiry_jobs
                SET run_at = $3,
                    attempts = GREATEST(attempts - 1, 0),
                    leased_until = NULL,
                    updated_at = now()
                WHERE {CURRENT_CLAIM}
                "
            ))
            .bind(order_id.as_uuid())
            .bind(attempts)
            .bind(run_at)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("reschedule expiry job", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn dead_letter(&self, claimed: &ExpiryJob, error: String) -> BookingFuture<'_, bool> {
        let params = Self::claim_params(claimed);
        Box::pin(async move {
            let (order_id, attempts) = params?;
            let result = sqlx::query(&format!(
                r"
                UPDATE order_expiry_jobs
                SET status = 'dead', last_error = $3, leased_until = NULL, updated_at = now()
                WHERE {CURRENT_CLAIM}
                "
            ))
            .bind(order_id.as_uuid())
            .bind(attempts)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("dead-letter expiry job", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn get_job(&self, order_id: OrderId) -> BookingFuture<'_, Option<ExpiryJob>> {
        Box::pin(async move {
            sqlx::query_as::<_, JobRow>(&format!(
                "SELECT {JOB_COLUMNS} FROM order_expiry_jobs WHERE order_id = $1"
            ))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("load expiry job", e))?
            .map(ExpiryJob::try_from)
            .transpose()
        })
    }

    fn pending_count(&self) -> BookingFuture<'_, u64> {
        Box::pin(async move {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM order_expiry_jobs WHERE status = 'pending'")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| storage_error("count pending expiry jobs", e))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }
}
