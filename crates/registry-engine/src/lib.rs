//! Registry Lifecycle Engine
//!
//! Core of a domain-name registry backend:
//! - Registrar sessions, login and lockout
//! - Time-aware `SQLite` store for domains, hosts and contacts
//! - Billing events, grace periods and their reversal
//! - Transfer state machine with lazy automatic approval
//! - Flow dispatcher running each command in one retried transaction
//! - DNS change signals, lookup and reporting reads
//! - Per-command metrics records

pub mod billing;
pub mod dns;
pub mod error;
pub mod flows;
pub mod lookup;
pub mod metrics;
pub mod model;
pub mod reporting;
pub mod session;
pub mod storage;
pub mod transfer;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_helpers;
