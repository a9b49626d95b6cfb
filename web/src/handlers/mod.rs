//! HTTP request handlers shared by kiosk services.

pub mod health;

pub use health::{ReadinessProbe, ReadinessProbes, health_check, readiness_check};
