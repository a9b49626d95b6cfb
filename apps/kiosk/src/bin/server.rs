//! Attendance Server
//!
//! Serves the validation API the kiosks call.
//!
//! This binary:
//! - Loads configuration from the environment (and `.env`)
//! - Connects to `PostgreSQL` and runs migrations, or falls back to in-memory stores
//! - Optionally seeds the sample attendees
//! - Serves HTTP until Ctrl+C
//!
//! # Usage
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/attendance cargo run --bin attendance-server
//! ```

use attendance_kiosk::{AppState, AttendanceService, Config, build_router};
use kiosk_core::attendance::{AttendanceLedger, AttendeeRegistry};
use kiosk_core::environment::SystemClock;
use kiosk_postgres::{PostgresAttendanceLedger, PostgresAttendeeRegistry};
use kiosk_testing::{InMemoryAttendanceLedger, InMemoryAttendeeRegistry};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,attendance_kiosk=debug,sqlx=warn,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting attendance server...");

    let config = Config::from_env()?;
    let address = config.bind_address()?;
    tracing::info!(
        %address,
        database = config.database.is_some(),
        events = config.events.len(),
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let (registry, ledger): (Arc<dyn AttendeeRegistry>, Arc<dyn AttendanceLedger>) =
        match &config.database {
            Some(database) => {
                let pool = kiosk_postgres::connect(
                    &database.url,
                    database.max_connections,
                    database.connect_timeout,
                )
                .await?;
                kiosk_postgres::migrate(&pool).await?;
                tracing::info!("✓ PostgreSQL connected, migrations applied");

                (
                    Arc::new(PostgresAttendeeRegistry::new(pool.clone())),
                    Arc::new(PostgresAttendanceLedger::new(pool)),
                )
            },
            None => {
                tracing::warn!("DATABASE_URL not set: using in-memory stores, nothing survives a restart");
                (
                    Arc::new(InMemoryAttendeeRegistry::new()),
                    Arc::new(InMemoryAttendanceLedger::new()),
                )
            },
        };

    let service = AttendanceService::new(registry, ledger, Arc::new(SystemClock));

    if config.seed_on_start {
        let inserted = service.seed_sample_attendees().await?;
        tracing::info!(inserted, "✓ Sample attendees seeded");
    }

    let state = AppState::new(service, config.events.clone()).with_metrics(metrics);
    let app = build_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(address).await?;
    tracing::info!(%address, "Attendance server is running. Press Ctrl+C to shutdown");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for Ctrl+C");
    }
    tracing::info!(timeout = ?config.shutdown_timeout, "Shutting down gracefully...");
    let _ = stop_tx.send(());

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(result) => result??,
        Err(_) => tracing::warn!("Open connections did not drain in time"),
    }

    tracing::info!("Shut down");
    Ok(())
}
