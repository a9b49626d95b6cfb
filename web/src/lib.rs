//! Axum integration for the attendance kiosk.
//!
//! This crate is the imperative shell around the kiosk's functional core:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, correlation ids
//! │  - Request parsing                      │  ← Logging, metrics
//! │  - Response serialization               │
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Attendance validation                │
//! │  - Scan state machine (reducer)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! It provides:
//! - [`AppError`]: maps domain failures to JSON error responses
//! - [`correlation_id_layer`]: per-request correlation ids, request spans and metrics
//! - [`handlers::health`]: liveness and readiness endpoints
//!
//! # Example
//!
//! ```ignore
//! use kiosk_web::{correlation_id_layer, handlers::health, AppError};
//! use axum::{Router, routing::{get, post}};
//!
//! let app = Router::new()
//!     .route("/mark-attendance", post(mark_attendance))
//!     .route("/health", get(health::health_check))
//!     .layer(correlation_id_layer())
//!     .with_state(state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
