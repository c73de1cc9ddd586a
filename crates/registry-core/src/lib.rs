//! Registry Core Library
//!
//! Shared functionality for the registry engine:
//! - Configuration resolution (defaults, settings files, environment)
//! - `SQLite` pool helpers and the shared `DatabaseError`
//! - Injectable clock and registry time constants
//! - Bounded retry policy for transient failures
//! - Tracing initialisation
//! - `OpenTelemetry` metrics export (`metrics` feature)

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod retry;
pub mod tracing_init;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{Config, ContactPolicy, SessionConfig, TldPolicy};
pub use error::{Error, Result};
pub use retry::RetryPolicy;
