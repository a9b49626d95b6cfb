//! HTTP API of the attendance server.
//!
//! ```text
//! POST /mark-attendance   validate a scan, record attendance
//! POST /seed              load the sample attendees
//! GET  /events            event catalog
//! GET  /events/:event/attendance
//!                         attendance recorded for one event
//! GET  /health            liveness
//! GET  /ready             registry and ledger reachability
//! GET  /metrics           Prometheus metrics
//! ```

pub mod attendance;

pub use attendance::{
    EventAttendanceResponse, EventsResponse, MarkAttendanceRequest, MessageResponse, SeedResponse,
};

use crate::validation::AttendanceService;
use axum::{
    Router,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kiosk_core::attendance::{AttendanceLedger, AttendeeRegistry, EventName};
use kiosk_web::correlation_id_layer;
use kiosk_web::handlers::health::{self, HealthCheck, ReadinessProbe, ReadinessProbes};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Validation service
    pub service: AttendanceService,
    /// Event catalog
    pub events: Arc<[EventName]>,
    /// Readiness checks
    pub probes: ReadinessProbes,
    /// Prometheus recorder handle; `/metrics` is 404 without one
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State whose readiness probes ping the service's registry and ledger
    #[must_use]
    pub fn new(service: AttendanceService, events: Vec<EventName>) -> Self {
        let probes = ReadinessProbes::new(vec![
            Arc::new(RegistryProbe(Arc::clone(service.registry()))),
            Arc::new(LedgerProbe(Arc::clone(service.ledger()))),
        ]);

        Self {
            service,
            events: events.into(),
            probes,
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl FromRef<AppState> for ReadinessProbes {
    fn from_ref(state: &AppState) -> Self {
        state.probes.clone()
    }
}

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/mark-attendance", post(attendance::mark_attendance))
        .route("/seed", post(attendance::seed))
        .route("/events", get(attendance::list_events))
        .route("/events/:event/attendance", get(attendance::event_attendance))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check::<AppState>))
        .route("/metrics", get(render_metrics))
        .layer(correlation_id_layer())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

struct RegistryProbe(Arc<dyn AttendeeRegistry>);

impl ReadinessProbe for RegistryProbe {
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
        Box::pin(async move {
            match self.0.ping().await {
                Ok(()) => HealthCheck::healthy("registry"),
                Err(error) => HealthCheck::unhealthy("registry", error.to_string()),
            }
        })
    }
}

struct LedgerProbe(Arc<dyn AttendanceLedger>);

impl ReadinessProbe for LedgerProbe {
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
        Box::pin(async move {
            match self.0.ping().await {
                Ok(()) => HealthCheck::healthy("ledger"),
                Err(error) => HealthCheck::unhealthy("ledger", error.to_string()),
            }
        })
    }
}
