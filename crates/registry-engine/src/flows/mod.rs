//! Lifecycle flows and the dispatcher that runs them.
//!
//! Each flow reads what it needs through the command's [`StoreTxn`] and
//! returns a [`FlowOutcome`]; the dispatcher saves the changeset, commits,
//! and only then signals DNS.
//!
//! [`StoreTxn`]: crate::storage::StoreTxn

mod autorenew;
mod command;
mod contact;
mod context;
mod dispatcher;
mod domain;
mod host;
mod poll;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod contact_tests;
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod poll_tests;
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod transfer_tests;

pub use autorenew::AutorenewSummary;
pub use command::*;
pub use dispatcher::{FlowDispatcher, FlowResponse};

use crate::model::ResourceKind;
use crate::storage::Changeset;

/// What a flow hands back to the dispatcher.
#[derive(Debug, Default)]
pub(crate) struct FlowOutcome {
    pub response: FlowResponse,
    pub changes: Changeset,
    /// Names whose published DNS data changed.
    pub dns: Vec<(String, ResourceKind)>,
}

impl FlowOutcome {
    pub fn respond(response: FlowResponse) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    pub fn with_changes(response: FlowResponse, changes: Changeset) -> Self {
        Self {
            response,
            changes,
            dns: Vec::new(),
        }
    }

    #[must_use]
    pub fn notify_dns(mut self, unique_id: &str, kind: ResourceKind) -> Self {
        self.dns.push((unique_id.to_string(), kind));
        self
    }
}
