//! Health check endpoints.
//!
//! - `GET /health`: liveness, never touches dependencies
//! - `GET /ready`: readiness, runs every registered [`ReadinessProbe`]
//!
//! Readiness is `503` as soon as one probe reports [`HealthStatus::Unhealthy`].

use axum::{
    Json,
    extract::{FromRef, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component works but something is off
    Degraded,
    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

/// Health check result for one component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Name of the component
    pub component: String,
    /// Current health status
    pub status: HealthStatus,
    /// Details, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Healthy component
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    /// Unhealthy component
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Aggregated readiness report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status of all checks
    pub status: HealthStatus,
    /// Individual component checks
    pub checks: Vec<HealthCheck>,
    /// When the report was generated
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Build a report from checks
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp: Utc::now(),
        }
    }
}

/// Something the readiness endpoint should check (database, ledger, ...)
pub trait ReadinessProbe: Send + Sync {
    /// Run the check
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>>;
}

/// The probes consulted by [`readiness_check`]
///
/// Extracted from the router state via [`FromRef`].
#[derive(Clone, Default)]
pub struct ReadinessProbes(Arc<Vec<Arc<dyn ReadinessProbe>>>);

impl ReadinessProbes {
    /// Wrap a list of probes
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn ReadinessProbe>>) -> Self {
        Self(Arc::new(probes))
    }

    /// Run every probe, in order
    pub async fn report(&self) -> HealthReport {
        let mut checks = Vec::with_capacity(self.0.len());
        for probe in self.0.iter() {
            checks.push(probe.check().await);
        }
        HealthReport::new(checks)
    }
}

impl std::fmt::Debug for ReadinessProbes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProbes")
            .field("count", &self.0.len())
            .finish()
    }
}

/// Liveness endpoint.
///
/// ```text
/// GET /health → 200 "ok"
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness endpoint.
///
/// ```text
/// GET /ready → 200 | 503 {"status": "healthy", "checks": [...], "timestamp": "..."}
/// ```
pub async fn readiness_check<S>(State(state): State<S>) -> (StatusCode, Json<HealthReport>)
where
    ReadinessProbes: FromRef<S>,
{
    let probes = ReadinessProbes::from_ref(&state);
    let report = probes.report().await;

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => {
            tracing::warn!(checks = ?report.checks, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        },
    };

    (status, Json(report))
}
