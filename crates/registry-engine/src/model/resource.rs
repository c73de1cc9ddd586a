//! EPP resources: the shared base record plus Domain/Host/Contact variants.

use std::collections::BTreeSet;
use std::net::IpAddr;

use registry_core::clock::END_OF_TIME;
use serde::{Deserialize, Serialize};

use super::billing::{GracePeriod, GracePeriodType};
use super::transfer::TransferData;

/// Resource variant discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Domain,
    Host,
    Contact,
}

text_enum!(ResourceKind {
    Domain => "domain",
    Host => "host",
    Contact => "contact",
});

/// EPP status values (RFC 5731-5733).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusValue {
    Ok,
    Inactive,
    Linked,
    PendingDelete,
    PendingTransfer,
    ClientDeleteProhibited,
    ClientHold,
    ClientRenewProhibited,
    ClientTransferProhibited,
    ClientUpdateProhibited,
    ServerDeleteProhibited,
    ServerHold,
    ServerRenewProhibited,
    ServerTransferProhibited,
    ServerUpdateProhibited,
}

text_enum!(StatusValue {
    Ok => "ok",
    Inactive => "inactive",
    Linked => "linked",
    PendingDelete => "pendingDelete",
    PendingTransfer => "pendingTransfer",
    ClientDeleteProhibited => "clientDeleteProhibited",
    ClientHold => "clientHold",
    ClientRenewProhibited => "clientRenewProhibited",
    ClientTransferProhibited => "clientTransferProhibited",
    ClientUpdateProhibited => "clientUpdateProhibited",
    ServerDeleteProhibited => "serverDeleteProhibited",
    ServerHold => "serverHold",
    ServerRenewProhibited => "serverRenewProhibited",
    ServerTransferProhibited => "serverTransferProhibited",
    ServerUpdateProhibited => "serverUpdateProhibited",
});

impl StatusValue {
    /// Statuses a sponsoring registrar may set or clear itself.
    pub const fn is_client_settable(self) -> bool {
        matches!(
            self,
            Self::ClientDeleteProhibited
                | Self::ClientHold
                | Self::ClientRenewProhibited
                | Self::ClientTransferProhibited
                | Self::ClientUpdateProhibited
        )
    }

    /// Statuses only a superuser may set or clear.
    pub const fn is_server_settable(self) -> bool {
        matches!(
            self,
            Self::ServerDeleteProhibited
                | Self::ServerHold
                | Self::ServerRenewProhibited
                | Self::ServerTransferProhibited
                | Self::ServerUpdateProhibited
        )
    }

    /// Statuses that change what is published in the zone.
    pub const fn affects_dns(self) -> bool {
        matches!(self, Self::ClientHold | Self::ServerHold)
    }
}

/// Role of a contact attached to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Admin,
    Billing,
    Tech,
}

/// A contact reference with its role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DesignatedContact {
    pub contact_type: ContactType,
    /// Contact repo id.
    pub contact: String,
}

/// DNSSEC delegation signer record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DelegationSignerData {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    /// Hex-encoded digest.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainData {
    pub fully_qualified_domain_name: String,
    pub tld: String,
    /// Registrant contact repo id.
    pub registrant: Option<String>,
    pub contacts: BTreeSet<DesignatedContact>,
    /// Host repo ids.
    pub nameservers: BTreeSet<String>,
    /// Fully qualified names of hosts under this domain.
    pub subordinate_hosts: BTreeSet<String>,
    pub ds_data: BTreeSet<DelegationSignerData>,
    pub auth_info: String,
    pub registration_expiration_time: i64,
    pub grace_periods: Vec<GracePeriod>,
    /// Recurring autorenew billing event for the current sponsor.
    pub autorenew_billing_event: Option<String>,
    /// Recurring autorenew poll message for the current sponsor.
    pub autorenew_poll_message: Option<String>,
}

impl DomainData {
    /// Grace periods still open at `now`.
    pub fn active_grace_periods(&self, now: i64) -> impl Iterator<Item = &GracePeriod> {
        self.grace_periods
            .iter()
            .filter(move |g| g.is_active_at(now))
    }

    pub fn has_active_grace_period(&self, grace_type: GracePeriodType, now: i64) -> bool {
        self.active_grace_periods(now)
            .any(|g| g.grace_type == grace_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostData {
    pub fully_qualified_host_name: String,
    pub inet_addresses: BTreeSet<IpAddr>,
    /// Repo id of the in-registry domain this host is subordinate to.
    pub superordinate_domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactData {
    pub contact_id: String,
    pub name: String,
    pub email: String,
    pub voice: Option<String>,
    pub auth_info: String,
}

/// Per-variant fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceDetails {
    Domain(DomainData),
    Host(HostData),
    Contact(ContactData),
}

/// A versioned registry object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EppResource {
    pub repo_id: String,
    pub creation_time: i64,
    pub creation_client_id: String,
    pub current_sponsor_client_id: String,
    pub last_update_time: i64,
    pub last_update_client_id: String,
    pub last_transfer_time: Option<i64>,
    pub status_values: BTreeSet<StatusValue>,
    /// `END_OF_TIME` while not deleted.
    pub deletion_time: i64,
    #[serde(default)]
    pub transfer_data: TransferData,
    /// Store revision; 0 for a resource that has never been saved.
    #[serde(skip)]
    pub revision: i64,
    pub details: ResourceDetails,
}

impl EppResource {
    /// A new, unsaved resource created by `client_id` at `now`.
    pub fn new(repo_id: String, client_id: &str, now: i64, details: ResourceDetails) -> Self {
        Self {
            repo_id,
            creation_time: now,
            creation_client_id: client_id.to_string(),
            current_sponsor_client_id: client_id.to_string(),
            last_update_time: now,
            last_update_client_id: client_id.to_string(),
            last_transfer_time: None,
            status_values: BTreeSet::new(),
            deletion_time: END_OF_TIME,
            transfer_data: TransferData::default(),
            revision: 0,
            details,
        }
    }

    pub const fn kind(&self) -> ResourceKind {
        match self.details {
            ResourceDetails::Domain(_) => ResourceKind::Domain,
            ResourceDetails::Host(_) => ResourceKind::Host,
            ResourceDetails::Contact(_) => ResourceKind::Contact,
        }
    }

    /// Domain name, host name or contact id.
    pub fn unique_id(&self) -> &str {
        match &self.details {
            ResourceDetails::Domain(d) => &d.fully_qualified_domain_name,
            ResourceDetails::Host(h) => &h.fully_qualified_host_name,
            ResourceDetails::Contact(c) => &c.contact_id,
        }
    }

    /// `creation_time <= t < deletion_time`.
    pub const fn is_active_at(&self, t: i64) -> bool {
        self.creation_time <= t && t < self.deletion_time
    }

    pub fn has_status(&self, status: StatusValue) -> bool {
        self.status_values.contains(&status)
    }

    pub const fn domain(&self) -> Option<&DomainData> {
        match &self.details {
            ResourceDetails::Domain(d) => Some(d),
            _ => None,
        }
    }

    pub const fn domain_mut(&mut self) -> Option<&mut DomainData> {
        match &mut self.details {
            ResourceDetails::Domain(d) => Some(d),
            _ => None,
        }
    }

    pub const fn host(&self) -> Option<&HostData> {
        match &self.details {
            ResourceDetails::Host(h) => Some(h),
            _ => None,
        }
    }

    pub const fn host_mut(&mut self) -> Option<&mut HostData> {
        match &mut self.details {
            ResourceDetails::Host(h) => Some(h),
            _ => None,
        }
    }

    pub const fn contact(&self) -> Option<&ContactData> {
        match &self.details {
            ResourceDetails::Contact(c) => Some(c),
            _ => None,
        }
    }

    pub const fn contact_mut(&mut self) -> Option<&mut ContactData> {
        match &mut self.details {
            ResourceDetails::Contact(c) => Some(c),
            _ => None,
        }
    }

    /// Auth info for variants that carry one.
    pub fn auth_info(&self) -> Option<&str> {
        match &self.details {
            ResourceDetails::Domain(d) => Some(&d.auth_info),
            ResourceDetails::Contact(c) => Some(&c.auth_info),
            ResourceDetails::Host(_) => None,
        }
    }

    /// Registration expiration for domains.
    pub fn expiration_time(&self) -> Option<i64> {
        self.domain().map(|d| d.registration_expiration_time)
    }

    /// Repo ids of the resources this one links to.
    pub fn linked_repo_ids(&self) -> BTreeSet<String> {
        match &self.details {
            ResourceDetails::Domain(d) => d
                .nameservers
                .iter()
                .cloned()
                .chain(d.registrant.iter().cloned())
                .chain(d.contacts.iter().map(|c| c.contact.clone()))
                .collect(),
            ResourceDetails::Host(_) | ResourceDetails::Contact(_) => BTreeSet::new(),
        }
    }

    /// Record a mutation by `client_id` at `now`.
    pub fn touch(&mut self, client_id: &str, now: i64) {
        self.last_update_time = now;
        self.last_update_client_id = client_id.to_string();
    }

    /// Copy with secrets removed, for viewers other than the sponsor.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        match &mut copy.details {
            ResourceDetails::Domain(d) => d.auth_info.clear(),
            ResourceDetails::Contact(c) => c.auth_info.clear(),
            ResourceDetails::Host(_) => {}
        }
        copy
    }
}
