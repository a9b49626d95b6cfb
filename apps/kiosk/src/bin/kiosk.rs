//! Attendance Kiosk
//!
//! Terminal kiosk driven by a keyboard-wedge QR scanner on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Against a running attendance server
//! cargo run --bin attendance-kiosk -- --server http://127.0.0.1:8080 --event "Event A"
//!
//! # Self-contained, with in-memory stores and the sample attendees
//! cargo run --bin attendance-kiosk -- --standalone --event "Event B"
//! ```

use attendance_kiosk::camera::WedgeCamera;
use attendance_kiosk::kiosk::{AlertKind, KioskUpdate};
use attendance_kiosk::validation::{AttendanceService, default_events};
use attendance_kiosk::{
    AttendanceClient, HttpAttendanceClient, KioskSession, LocalAttendanceClient, ScanConfig,
    ScanController,
};
use clap::Parser;
use kiosk_core::environment::SystemClock;
use kiosk_testing::{InMemoryAttendanceLedger, InMemoryAttendeeRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "attendance-kiosk", about = "Scan attendee QR codes and mark attendance")]
struct Args {
    /// Attendance server base URL
    #[arg(long, env = "KIOSK_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Event to validate scans against
    #[arg(long, env = "KIOSK_EVENT")]
    event: String,

    /// Validate in-process with in-memory stores instead of calling a server
    #[arg(long)]
    standalone: bool,

    /// Seconds to wait for the camera to be released on exit
    #[arg(long, default_value_t = 5)]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,attendance_kiosk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let client: Arc<dyn AttendanceClient> = if args.standalone {
        let service = AttendanceService::new(
            Arc::new(InMemoryAttendeeRegistry::new()),
            Arc::new(InMemoryAttendanceLedger::new()),
            Arc::new(SystemClock),
        );
        service.seed_sample_attendees().await?;
        tracing::info!("Standalone mode: sample attendees loaded");
        Arc::new(LocalAttendanceClient::new(service))
    } else {
        tracing::info!(server = %args.server, "Using attendance server");
        Arc::new(HttpAttendanceClient::new(&args.server))
    };

    let scanner = ScanController::new(
        Arc::new(WedgeCamera::stdin()),
        Arc::new(SystemClock),
        ScanConfig::default(),
    );
    let mut session = KioskSession::new(scanner, client, default_events());
    session.select_event(&args.event)?;
    session.toggle_scanner().await?;

    println!("Scanning for {}. Press Ctrl+C to stop.", args.event);

    loop {
        tokio::select! {
            update = session.next_update() => {
                match update {
                    Some(KioskUpdate::Scanned(attendee)) => println!("Scanned: {attendee}"),
                    Some(KioskUpdate::Alert(alert)) => match alert.kind {
                        AlertKind::Success => println!("✓ {}", alert.message),
                        AlertKind::Error => println!("✗ {}", alert.message),
                    },
                    Some(KioskUpdate::Scanning(true)) => println!("Camera ready"),
                    Some(KioskUpdate::Scanning(false)) => {
                        println!("Camera stopped");
                        break;
                    },
                    None => break,
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown(Duration::from_secs(args.shutdown_timeout)).await?;
    Ok(())
}
