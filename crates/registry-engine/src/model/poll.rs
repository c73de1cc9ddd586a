//! Poll messages queued for registrars.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMessageKind {
    OneTime,
    /// Re-delivered once per registration year until `autorenew_end_time`.
    Autorenew,
}

text_enum!(PollMessageKind {
    OneTime => "one_time",
    Autorenew => "autorenew",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollMessage {
    pub id: String,
    pub kind: PollMessageKind,
    /// Owning registrar; never shared.
    pub client_id: String,
    pub repo_id: String,
    pub target_id: String,
    /// Deliverable once `event_time <= now`.
    pub event_time: i64,
    pub message: String,
    pub autorenew_end_time: Option<i64>,
    pub history_id: String,
}
