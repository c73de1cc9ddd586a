//! Parsed, validated commands as handed to the dispatcher.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{ContactType, DelegationSignerData, StatusValue, text_enum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Domain,
    Host,
    Contact,
    Poll,
    Session,
}

text_enum!(ObjectType {
    Domain => "domain",
    Host => "host",
    Contact => "contact",
    Poll => "poll",
    Session => "session",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Update,
    Delete,
    Renew,
    Info,
    TransferRequest,
    TransferApprove,
    TransferReject,
    TransferCancel,
    TransferQuery,
    PollRequest,
    PollAck,
    Logout,
}

text_enum!(Verb {
    Create => "create",
    Update => "update",
    Delete => "delete",
    Renew => "renew",
    Info => "info",
    TransferRequest => "transfer_request",
    TransferApprove => "transfer_approve",
    TransferReject => "transfer_reject",
    TransferCancel => "transfer_cancel",
    TransferQuery => "transfer_query",
    PollRequest => "poll_request",
    PollAck => "poll_ack",
    Logout => "logout",
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMetadata {
    pub client_transaction_id: Option<String>,
}

/// A contact reference by contact id, with its role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactRef {
    pub contact_type: ContactType,
    pub contact_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCreate {
    pub period_years: u32,
    /// Contact id of the registrant.
    pub registrant: Option<String>,
    #[serde(default)]
    pub contacts: Vec<ContactRef>,
    /// Host names.
    #[serde(default)]
    pub nameservers: BTreeSet<String>,
    #[serde(default)]
    pub ds_data: BTreeSet<DelegationSignerData>,
    pub auth_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainUpdate {
    pub add_nameservers: BTreeSet<String>,
    pub remove_nameservers: BTreeSet<String>,
    pub add_contacts: Vec<ContactRef>,
    pub remove_contacts: Vec<ContactRef>,
    pub add_statuses: BTreeSet<StatusValue>,
    pub remove_statuses: BTreeSet<StatusValue>,
    pub add_ds_data: BTreeSet<DelegationSignerData>,
    pub remove_ds_data: BTreeSet<DelegationSignerData>,
    pub registrant: Option<String>,
    pub auth_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRenew {
    /// Must match the registration expiration date (UTC).
    pub current_expiration_date: NaiveDate,
    pub period_years: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequestAttributes {
    pub auth_info: String,
    #[serde(default = "one_year")]
    pub period_years: u32,
}

const fn one_year() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCreate {
    #[serde(default)]
    pub inet_addresses: BTreeSet<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostUpdate {
    pub add_addresses: BTreeSet<IpAddr>,
    pub remove_addresses: BTreeSet<IpAddr>,
    pub add_statuses: BTreeSet<StatusValue>,
    pub remove_statuses: BTreeSet<StatusValue>,
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCreate {
    pub name: String,
    pub email: String,
    pub voice: Option<String>,
    pub auth_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub voice: Option<String>,
    pub auth_info: Option<String>,
    pub add_statuses: BTreeSet<StatusValue>,
    pub remove_statuses: BTreeSet<StatusValue>,
}

/// Verb-specific payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Attributes {
    #[default]
    None,
    DomainCreate(DomainCreate),
    DomainUpdate(DomainUpdate),
    DomainRenew(DomainRenew),
    TransferRequest(TransferRequestAttributes),
    HostCreate(HostCreate),
    HostUpdate(HostUpdate),
    ContactCreate(ContactCreate),
    ContactUpdate(ContactUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub object_type: ObjectType,
    pub verb: Verb,
    /// Domain name, host name, contact id, or poll message id for acks.
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub attributes: Attributes,
    /// Registrar to act as; only a superuser may name someone else.
    #[serde(default)]
    pub requested_client_id: Option<String>,
    #[serde(default)]
    pub metadata: CommandMetadata,
}

impl Command {
    pub fn new(object_type: ObjectType, verb: Verb, target_id: impl Into<String>) -> Self {
        Self {
            object_type,
            verb,
            target_id: target_id.into(),
            attributes: Attributes::None,
            requested_client_id: None,
            metadata: CommandMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn acting_as(mut self, client_id: impl Into<String>) -> Self {
        self.requested_client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn with_transaction_id(mut self, client_transaction_id: impl Into<String>) -> Self {
        self.metadata.client_transaction_id = Some(client_transaction_id.into());
        self
    }
}
