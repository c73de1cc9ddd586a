//! Pending-transfer record carried by domains and contacts.

use serde::{Deserialize, Serialize};

use super::billing::{BillingEvent, GracePeriod};
use super::poll::PollMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    #[default]
    None,
    Pending,
    ClientApproved,
    ClientRejected,
    ClientCancelled,
    ServerApproved,
    /// Ended because the resource was deleted while pending.
    ServerCancelled,
}

text_enum!(TransferStatus {
    None => "none",
    Pending => "pending",
    ClientApproved => "client_approved",
    ClientRejected => "client_rejected",
    ClientCancelled => "client_cancelled",
    ServerApproved => "server_approved",
    ServerCancelled => "server_cancelled",
});

impl TransferStatus {
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Entities that become authoritative if the transfer is approved without an
/// explicit decision. Computed at request time, never stored as live rows
/// until applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerApproveEffects {
    /// Id of the history entry written when the effects are applied; every
    /// precomputed entity names it as parent.
    pub history_id: String,
    /// Registration expiration after the transfer (domains only).
    pub new_expiration_time: Option<i64>,
    pub billing_event: Option<BillingEvent>,
    pub grace_period: Option<GracePeriod>,
    pub autorenew_event: Option<BillingEvent>,
    pub autorenew_poll: Option<PollMessage>,
    pub poll_messages: Vec<PollMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferData {
    pub status: TransferStatus,
    pub gaining_client_id: Option<String>,
    pub losing_client_id: Option<String>,
    pub request_time: Option<i64>,
    pub pending_expiration_time: Option<i64>,
    pub extended_registration_years: u32,
    pub server_approve: Option<ServerApproveEffects>,
}

impl TransferData {
    pub const fn is_pending(&self) -> bool {
        self.status.is_pending()
    }
}
