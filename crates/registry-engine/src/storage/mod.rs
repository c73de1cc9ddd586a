//! `SQLite` storage for the registry engine.
//!
//! Provides persistence for registrars, resources, history, billing events
//! and poll messages.

mod db;
mod models;
mod queries;
mod txn;


pub use db::RegistryDatabase;
pub use queries::NewRegistrarParams;
pub use registry_core::db::DatabaseError;
pub use txn::{BillingUpdate, Changeset, PollUpdate, StoreTxn};
