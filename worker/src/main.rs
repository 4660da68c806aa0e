//! Cinema booking background worker.
//!
//! Runs the hold expiry worker and the booked-seat counter reconciler against
//! `PostgreSQL` until the process receives Ctrl+C or SIGTERM.

use anyhow::Context;
use cinema_booking_core::BookingConfig;
use cinema_booking_core::environment::SystemClock;
use cinema_booking_postgres::{PostgresBookingStore, PostgresExpiryQueue};
use cinema_booking_runtime::metrics::install_prometheus_exporter;
use cinema_booking_runtime::{
    BookingEnvironment, CounterReconciler, ExpiryWorker, OrderService, RandomOrderNumbers,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cinema booking worker");

    let booking = BookingConfig::from_env();
    info!(
        postgres_url = %config.postgres.url,
        hold_secs = booking.hold_duration.as_secs(),
        max_seats_per_order = booking.max_seats_per_order,
        "Configuration loaded"
    );

    let metrics_addr = config
        .metrics_addr()
        .context("invalid METRICS_HOST/METRICS_PORT")?;
    install_prometheus_exporter(metrics_addr)?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .idle_timeout(Duration::from_secs(config.postgres.idle_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    cinema_booking_postgres::migrate(&pool).await?;
    info!("Database ready");

    let store = Arc::new(PostgresBookingStore::new(pool.clone()));
    let env = BookingEnvironment {
        registry: store.clone(),
        ledger: store.clone(),
        queue: Arc::new(PostgresExpiryQueue::new(pool.clone())),
        clock: Arc::new(SystemClock),
        order_numbers: Arc::new(RandomOrderNumbers),
    };
    let service = OrderService::new(env, booking);

    let worker = Arc::new(ExpiryWorker::new(service, config.expiry_worker()));
    let reconciler = Arc::new(CounterReconciler::new(store, config.counter_reconciler()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { worker.run(shutdown).await }
    });
    let reconciler_handle = tokio::spawn(async move { reconciler.run(shutdown_rx).await });
    info!("Expiry worker and counter reconciler started");

    shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        warn!("Background tasks already stopped");
    }

    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        let (worker, reconciler) = tokio::join!(worker_handle, reconciler_handle);
        for (task, joined) in [("expiry worker", worker), ("reconciler", reconciler)] {
            if let Err(e) = joined {
                error!(task, error = %e, "Background task panicked");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Shutdown timed out with tasks still running"
        );
    }

    pool.close().await;
    info!("Worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
