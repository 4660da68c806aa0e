//! Expiry worker behavior: idempotence, leases, retries and the overdue sweep.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use cinema_booking_core::expiry::{ExpiryQueue, JobStatus};
use cinema_booking_core::{OrderId, OrderStatus, PaymentMethod, UserId};
use cinema_booking_runtime::{
    CreateOrder, ExpiryOutcome, ExpiryWorkerConfig, PaymentConfirmation, RetryPolicy,
    WorkerReport,
};
use cinema_booking_testing::CinemaFixture;

fn fast_retry(max_retries: u32) -> ExpiryWorkerConfig {
    ExpiryWorkerConfig {
        retry: RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(std::time::Duration::from_secs(1))
            .max_delay(std::time::Duration::from_secs(4))
            .build(),
        ..ExpiryWorkerConfig::default()
    }
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(15));
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.expired, 1);
    assert_eq!(cinema.booked_seats(), 0);

    let second = worker.run_once().await.unwrap();
    assert!(second.is_empty());
    assert_eq!(cinema.booked_seats(), 0);

    let outcome = cinema.service.expire_order(order.id).await.unwrap();
    assert_eq!(outcome, ExpiryOutcome::AlreadyFinal(OrderStatus::Expired));
    assert_eq!(cinema.booked_seats(), 0);

    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
}

#[tokio::test]
async fn jobs_before_the_deadline_are_not_claimed() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(14));
    assert!(worker.run_once().await.unwrap().is_empty());
    assert_eq!(cinema.booked_seats(), 1);
}

#[tokio::test]
async fn paid_order_job_completes_without_releasing() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();
    cinema
        .service
        .confirm_payment(PaymentConfirmation {
            order_id: order.id,
            success: true,
        })
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(20));
    let report = worker.run_once().await.unwrap();
    assert_eq!(
        report,
        WorkerReport {
            claimed: 1,
            skipped: 1,
            ..WorkerReport::default()
        }
    );
    assert_eq!(cinema.booked_seats(), 2);
    assert_eq!(
        cinema.service.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn early_delivery_is_rescheduled_to_the_deadline() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    // Pull the job forward so it fires before the hold deadline
    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert!(
        cinema
            .queue
            .retry_at(&job, cinema_now(&cinema), "forced".to_string())
            .await
            .unwrap()
    );

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.rescheduled, 1);
    assert_eq!(cinema.booked_seats(), 1);

    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert_eq!(job.run_at, order.expires_at);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.status, JobStatus::Pending);
}

#[tokio::test]
async fn job_for_unknown_order_is_skipped() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    let stray = OrderId::new();
    cinema.queue.enqueue(stray, cinema_now(&cinema)).await.unwrap();

    let report = worker.run_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(
        cinema.queue.get_job(stray).await.unwrap().unwrap().status,
        JobStatus::Done
    );
}

#[tokio::test]
async fn transient_failure_is_retried_with_backoff() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(fast_retry(3));
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(15));
    cinema.store.fail_next(1);
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(cinema.booked_seats(), 1);

    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
    assert_eq!(job.run_at, cinema_now(&cinema) + Duration::seconds(1));
    assert!(job.last_error.is_some());

    cinema.clock.advance(Duration::seconds(1));
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn exhausted_job_is_dead_lettered() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(fast_retry(1));
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(15));
    cinema.store.fail_next(usize::MAX);

    assert_eq!(worker.run_once().await.unwrap().retried, 1);
    cinema.clock.advance(Duration::seconds(1));
    assert_eq!(worker.run_once().await.unwrap().dead_lettered, 1);

    let dead = cinema.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].order_id, order.id);
    assert_eq!(dead[0].attempts, 2);

    // Dead jobs are never claimed again
    cinema.clock.advance(Duration::minutes(5));
    assert!(worker.run_once().await.unwrap().is_empty());

    // The hold is still visible to the sweep once the store recovers
    cinema.store.fail_next(0);
    assert_eq!(worker.sweep_overdue().await.unwrap(), 1);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn crashed_worker_job_is_redelivered_after_lease() {
    let cinema = CinemaFixture::new().await;
    let config = ExpiryWorkerConfig {
        lease: std::time::Duration::from_secs(30),
        ..ExpiryWorkerConfig::default()
    };
    let worker = cinema.expiry_worker(config);
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();

    cinema.clock.advance(Duration::minutes(15));
    // Another worker claims the job and dies before finishing it
    let claimed = cinema
        .queue
        .claim_due(cinema_now(&cinema), 10, std::time::Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    assert!(worker.run_once().await.unwrap().is_empty());

    cinema.clock.advance(Duration::seconds(30));
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(
        cinema.service.get_order(order.id).await.unwrap().status,
        OrderStatus::Expired
    );

    // The first worker wakes up and reports a failure for its expired claim
    assert!(
        !cinema
            .queue
            .dead_letter(&claimed[0], "woke up late".to_string())
            .await
            .unwrap()
    );
    let job = cinema.queue.get_job(order.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert!(cinema.queue.dead_letters().is_empty());
}

#[tokio::test]
async fn sweep_expires_orders_whose_job_was_lost() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig::default());
    cinema.queue.fail_next_enqueues(1);

    let lost = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2", "A3"]))
        .await
        .unwrap();
    let tracked = cinema
        .service
        .create_order(CreateOrder {
            user_id: UserId::new(),
            schedule_id: cinema.schedule.id,
            seat_ids: vec![cinema.seat("B1")],
            payment_method: PaymentMethod::CreditCard,
        })
        .await
        .unwrap();
    assert_eq!(cinema.booked_seats(), 4);

    cinema.clock.advance(Duration::minutes(15));
    assert_eq!(worker.sweep_overdue().await.unwrap(), 2);
    assert_eq!(cinema.booked_seats(), 0);

    for id in [lost.id, tracked.id] {
        assert_eq!(
            cinema.service.get_order(id).await.unwrap().status,
            OrderStatus::Expired
        );
    }

    // The queued job for the tracked order now finds nothing to do
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(ExpiryWorkerConfig {
        poll_interval: std::time::Duration::from_millis(10),
        ..ExpiryWorkerConfig::default()
    });
    let order = cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1"]))
        .await
        .unwrap();
    cinema.clock.advance(Duration::minutes(15));

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(rx).await });

    let service = cinema.service.clone();
    let expired = tokio::time::timeout(std::time::Duration::from_secs(5), async move {
        loop {
            if service.get_order(order.id).await.unwrap().status == OrderStatus::Expired {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(expired.is_ok(), "worker should expire the overdue hold");

    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("worker stops after shutdown signal")
        .unwrap();
}

fn cinema_now(cinema: &CinemaFixture) -> chrono::DateTime<chrono::Utc> {
    use cinema_booking_core::environment::Clock;
    cinema.clock.now()
}
