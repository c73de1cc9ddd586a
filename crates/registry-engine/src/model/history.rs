//! Append-only audit records.

use serde::{Deserialize, Serialize};

use super::resource::EppResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryType {
    DomainCreate,
    DomainUpdate,
    DomainDelete,
    DomainRenew,
    DomainAutorenew,
    DomainTransferRequest,
    DomainTransferApprove,
    DomainTransferReject,
    DomainTransferCancel,
    DomainTransferServerApprove,
    HostCreate,
    HostUpdate,
    HostDelete,
    ContactCreate,
    ContactUpdate,
    ContactDelete,
    ContactTransferRequest,
    ContactTransferApprove,
    ContactTransferReject,
    ContactTransferCancel,
    ContactTransferServerApprove,
}

text_enum!(HistoryType {
    DomainCreate => "domain_create",
    DomainUpdate => "domain_update",
    DomainDelete => "domain_delete",
    DomainRenew => "domain_renew",
    DomainAutorenew => "domain_autorenew",
    DomainTransferRequest => "domain_transfer_request",
    DomainTransferApprove => "domain_transfer_approve",
    DomainTransferReject => "domain_transfer_reject",
    DomainTransferCancel => "domain_transfer_cancel",
    DomainTransferServerApprove => "domain_transfer_server_approve",
    HostCreate => "host_create",
    HostUpdate => "host_update",
    HostDelete => "host_delete",
    ContactCreate => "contact_create",
    ContactUpdate => "contact_update",
    ContactDelete => "contact_delete",
    ContactTransferRequest => "contact_transfer_request",
    ContactTransferApprove => "contact_transfer_approve",
    ContactTransferReject => "contact_transfer_reject",
    ContactTransferCancel => "contact_transfer_cancel",
    ContactTransferServerApprove => "contact_transfer_server_approve",
});

/// One committed mutation of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub repo_id: String,
    pub history_type: HistoryType,
    pub modification_time: i64,
    pub client_id: String,
    pub period_years: Option<u32>,
    pub reason: Option<String>,
    /// False for server-initiated changes (autorenew, transfer auto-approval).
    pub requested_by_registrar: bool,
    /// Client transaction id of the originating command, if any.
    pub client_transaction_id: Option<String>,
    /// The resource as it stands after the mutation.
    pub snapshot: EppResource,
}

impl HistoryEntry {
    /// Entry for `snapshot`, requested by a registrar.
    pub fn new(
        id: String,
        history_type: HistoryType,
        client_id: &str,
        modification_time: i64,
        snapshot: EppResource,
    ) -> Self {
        Self {
            id,
            repo_id: snapshot.repo_id.clone(),
            history_type,
            modification_time,
            client_id: client_id.to_string(),
            period_years: None,
            reason: None,
            requested_by_registrar: true,
            client_transaction_id: None,
            snapshot,
        }
    }
}
