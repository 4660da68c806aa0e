//! Counter reconciliation against the in-memory ledger.

#![allow(clippy::unwrap_used)]

use chrono::Duration;
use cinema_booking_core::CounterDrift;
use cinema_booking_runtime::{CounterReconciler, ReconcilerConfig, RetryPolicy};
use cinema_booking_testing::CinemaFixture;
use std::sync::Arc;

fn quick_reconciler(cinema: &CinemaFixture) -> CounterReconciler {
    CounterReconciler::new(
        Arc::new(cinema.store.clone()),
        ReconcilerConfig {
            interval: std::time::Duration::from_millis(10),
            retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(std::time::Duration::from_millis(1))
                .max_delay(std::time::Duration::from_millis(5))
                .build(),
        },
    )
}

#[tokio::test]
async fn consistent_counters_need_no_correction() {
    let cinema = CinemaFixture::new().await;
    cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();

    let drifts = cinema.reconciler().reconcile(None).await.unwrap();
    assert!(drifts.is_empty());
    assert_eq!(cinema.booked_seats(), 2);
}

#[tokio::test]
async fn drift_is_corrected_from_active_entries() {
    let cinema = CinemaFixture::new().await;
    cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2", "A3"]))
        .await
        .unwrap();
    cinema.store.set_booked_seats(cinema.schedule.id, 7);

    let drifts = cinema
        .reconciler()
        .reconcile(Some(cinema.schedule.id))
        .await
        .unwrap();

    assert_eq!(
        drifts,
        vec![CounterDrift {
            schedule_id: cinema.schedule.id,
            cached: 7,
            actual: 3,
        }]
    );
    assert_eq!(cinema.booked_seats(), 3);

    // A second pass finds nothing left to fix
    assert!(cinema.reconciler().reconcile(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_entries_do_not_count() {
    let cinema = CinemaFixture::new().await;
    let worker = cinema.expiry_worker(cinema_booking_runtime::ExpiryWorkerConfig::default());
    cinema
        .service
        .create_order(cinema.request(cinema.customer, &["A1", "A2"]))
        .await
        .unwrap();
    cinema.clock.advance(Duration::minutes(15));
    worker.run_once().await.unwrap();

    cinema.store.set_booked_seats(cinema.schedule.id, 2);
    let drifts = cinema.reconciler().reconcile(None).await.unwrap();
    assert_eq!(drifts.len(), 1);
    assert_eq!(drifts[0].actual, 0);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let cinema = CinemaFixture::new().await;
    cinema.store.set_booked_seats(cinema.schedule.id, 4);
    cinema.store.fail_next(1);

    let drifts = quick_reconciler(&cinema).reconcile(None).await.unwrap();
    assert_eq!(drifts.len(), 1);
    assert_eq!(cinema.booked_seats(), 0);
}

#[tokio::test]
async fn persistent_failure_surfaces_after_retries() {
    let cinema = CinemaFixture::new().await;
    cinema.store.set_booked_seats(cinema.schedule.id, 4);
    cinema.store.fail_next(10);

    let err = quick_reconciler(&cinema).reconcile(None).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(cinema.booked_seats(), 4);
}

#[tokio::test]
async fn run_corrects_drift_until_shutdown() {
    let cinema = CinemaFixture::new().await;
    cinema.store.set_booked_seats(cinema.schedule.id, 9);
    let reconciler = quick_reconciler(&cinema);

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { reconciler.run(rx).await });

    let store = cinema.store.clone();
    let schedule_id = cinema.schedule.id;
    let corrected = tokio::time::timeout(std::time::Duration::from_secs(5), async move {
        while store.booked_seats(schedule_id) != Some(0) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(corrected.is_ok());

    tx.send(true).unwrap();
    assert!(
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .is_ok()
    );
}
