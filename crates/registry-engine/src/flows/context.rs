//! Checks shared by every flow.

use std::collections::BTreeSet;

use registry_core::{Config, TldPolicy};

use super::command::Command;
use crate::error::{FlowError, FlowResult};
use crate::model::{EppResource, HistoryEntry, HistoryType, ResourceKind, StatusValue, new_id};
use crate::storage::StoreTxn;

/// The acting registrar and the command being run.
pub(crate) struct FlowContext<'a> {
    /// Registrar the command acts as: the session's, or the one a superuser
    /// asked for.
    pub client_id: &'a str,
    pub superuser: bool,
    pub command: &'a Command,
    pub config: &'a Config,
}

impl FlowContext<'_> {
    /// History entry for `snapshot`, tagged with the command's transaction id.
    pub fn history(
        &self,
        id: String,
        history_type: HistoryType,
        now: i64,
        snapshot: &EppResource,
    ) -> HistoryEntry {
        let mut entry = HistoryEntry::new(id, history_type, self.client_id, now, snapshot.clone());
        entry
            .client_transaction_id
            .clone_from(&self.command.metadata.client_transaction_id);
        entry
    }

    pub fn new_history(
        &self,
        history_type: HistoryType,
        now: i64,
        snapshot: &EppResource,
    ) -> HistoryEntry {
        self.history(new_id(), history_type, now, snapshot)
    }

    /// Superusers may touch anything; everyone else only what they sponsor.
    pub fn verify_sponsor(&self, resource: &EppResource) -> FlowResult<()> {
        if self.superuser || resource.current_sponsor_client_id == self.client_id {
            Ok(())
        } else {
            Err(FlowError::NotAuthorized(format!(
                "{} is not sponsored by {}",
                resource.unique_id(),
                self.client_id
            )))
        }
    }

    /// Policy for `tld`, provided the registry serves it and the acting
    /// registrar may use it.
    pub async fn verify_tld_access(
        &self,
        txn: &mut StoreTxn,
        tld: &str,
    ) -> FlowResult<&TldPolicy> {
        let policy = self
            .config
            .tld(tld)
            .ok_or_else(|| FlowError::TldNotAllowed(tld.to_string()))?;
        if self.superuser {
            return Ok(policy);
        }
        let allowed = txn
            .find_registrar(self.client_id)
            .await?
            .is_some_and(|r| r.may_access_tld(tld));
        if allowed {
            Ok(policy)
        } else {
            Err(FlowError::NotAuthorizedForTld(tld.to_string()))
        }
    }

    /// Only client statuses may be set by registrars; server statuses need a
    /// superuser; nothing else is settable at all.
    pub fn verify_status_changes(
        &self,
        add: &BTreeSet<StatusValue>,
        remove: &BTreeSet<StatusValue>,
    ) -> FlowResult<()> {
        for status in add.iter().chain(remove) {
            if status.is_client_settable() {
                continue;
            }
            if status.is_server_settable() {
                if self.superuser {
                    continue;
                }
                return Err(FlowError::NotAuthorized(format!(
                    "only a superuser may change {status}"
                )));
            }
            return Err(FlowError::MalformedCommand(format!(
                "{status} cannot be set by command"
            )));
        }
        Ok(())
    }

    /// Update is blocked by pending delete and by update-prohibited statuses,
    /// except when the same command lifts the client prohibition.
    pub fn verify_updatable(
        &self,
        resource: &EppResource,
        removing: &BTreeSet<StatusValue>,
    ) -> FlowResult<()> {
        verify_no_status(resource, &[StatusValue::PendingDelete])?;
        if !self.superuser {
            verify_no_status(resource, &[StatusValue::ServerUpdateProhibited])?;
        }
        if !removing.contains(&StatusValue::ClientUpdateProhibited) {
            verify_no_status(resource, &[StatusValue::ClientUpdateProhibited])?;
        }
        Ok(())
    }

    pub fn malformed(&self) -> FlowError {
        FlowError::MalformedCommand(format!(
            "attributes do not match {} {}",
            self.command.object_type, self.command.verb
        ))
    }
}

/// Fail with `StatusProhibitsOperation` if `resource` carries any of
/// `blocking`.
pub(crate) fn verify_no_status(resource: &EppResource, blocking: &[StatusValue]) -> FlowResult<()> {
    match blocking.iter().find(|s| resource.has_status(**s)) {
        Some(status) => Err(FlowError::StatusProhibitsOperation(*status)),
        None => Ok(()),
    }
}

/// Load an active resource or fail with `NotFound`.
pub(crate) async fn load_existing(
    txn: &mut StoreTxn,
    kind: ResourceKind,
    unique_id: &str,
    now: i64,
) -> FlowResult<EppResource> {
    txn.find_active(kind, unique_id, now)
        .await?
        .ok_or_else(|| FlowError::not_found(kind, unique_id))
}

/// Resolve a linked host or contact to its repo id.
pub(crate) async fn resolve_link(
    txn: &mut StoreTxn,
    kind: ResourceKind,
    unique_id: &str,
    now: i64,
) -> FlowResult<String> {
    txn.find_active(kind, unique_id, now)
        .await?
        .map(|r| r.repo_id)
        .ok_or_else(|| FlowError::LinkedResourceNotFound {
            kind,
            id: unique_id.to_string(),
        })
}

/// Apply status additions and removals.
pub(crate) fn apply_status_changes(
    resource: &mut EppResource,
    add: &BTreeSet<StatusValue>,
    remove: &BTreeSet<StatusValue>,
) {
    for status in remove {
        resource.status_values.remove(status);
    }
    resource.status_values.extend(add.iter().copied());
}

/// A host or domain name: lowercase LDH labels, at least two of them.
pub(crate) fn validate_fqdn(name: &str) -> FlowResult<()> {
    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    };
    if name.len() > 253 || !name.contains('.') || !name.split('.').all(valid_label) {
        return Err(FlowError::MalformedCommand(format!(
            "{name} is not a valid fully qualified name"
        )));
    }
    Ok(())
}
