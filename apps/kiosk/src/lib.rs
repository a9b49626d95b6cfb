//! QR event-attendance kiosk.
//!
//! A kiosk points a camera at attendees' QR codes; each decoded code is an
//! attendee id that is validated against the selected event and recorded
//! at most once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  frames  ┌────────────────┐ candidates ┌──────────────┐
//! │  Camera  │ ───────▶ │ ScanController │ ─────────▶ │ KioskSession │
//! └──────────┘          │  (ScanReducer) │            └──────┬───────┘
//!                       └────────────────┘                   │ POST /mark-attendance
//!                                                            ▼
//!                       ┌────────────────┐            ┌──────────────┐
//!                       │ registry/ledger│ ◀───────── │ HTTP API     │
//!                       │ (Postgres/mem) │            │ (Attendance- │
//!                       └────────────────┘            │   Service)   │
//!                                                     └──────────────┘
//! ```
//!
//! - [`scanner`]: device selection, debounce and cooldown of camera reads
//! - [`validation`]: registration check and idempotent recording
//! - [`api`]: the HTTP surface of the validation service
//! - [`kiosk`]: the operator session tying a scanner to a server
//! - [`camera`]: a line-oriented scanner (keyboard wedge, stdin)
//! - [`config`]: server configuration from the environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod camera;
pub mod config;
pub mod kiosk;
pub mod scanner;
pub mod validation;

pub use api::{AppState, build_router};
pub use config::Config;
pub use kiosk::{AttendanceClient, HttpAttendanceClient, KioskSession, LocalAttendanceClient};
pub use scanner::{ScanConfig, ScanController, ScanEvent};
pub use validation::{AttendanceError, AttendanceService};
