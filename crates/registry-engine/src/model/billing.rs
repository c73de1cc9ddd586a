//! Billing events and grace periods.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventKind {
    /// Bills once at `billing_time`.
    OneTime,
    /// Open-ended autorenew obligation until `recurrence_end_time`.
    Recurring,
    /// Refund of a one-time event or of one recurring occurrence.
    Cancellation,
}

text_enum!(BillingEventKind {
    OneTime => "one_time",
    Recurring => "recurring",
    Cancellation => "cancellation",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingReason {
    Create,
    Renew,
    Transfer,
    AutoRenew,
}

text_enum!(BillingReason {
    Create => "create",
    Renew => "renew",
    Transfer => "transfer",
    AutoRenew => "auto_renew",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFlag {
    AutoRenew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    pub kind: BillingEventKind,
    pub reason: BillingReason,
    pub repo_id: String,
    /// Domain name or contact id at the time of the event.
    pub target_id: String,
    pub client_id: String,
    /// Minor currency units.
    pub cost: i64,
    pub currency: String,
    pub period_years: u32,
    pub event_time: i64,
    pub billing_time: i64,
    pub recurrence_end_time: Option<i64>,
    /// Event refunded by a cancellation.
    pub cancelled_event_id: Option<String>,
    /// Set when a one-time event is reversed inside its grace period.
    pub voided: bool,
    pub flags: BTreeSet<BillingFlag>,
    /// History entry that produced this event.
    pub history_id: String,
}

impl BillingEvent {
    pub fn is_recurring(&self) -> bool {
        self.kind == BillingEventKind::Recurring
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePeriodType {
    Add,
    Renew,
    Transfer,
    AutoRenew,
    Redemption,
}

text_enum!(GracePeriodType {
    Add => "add",
    Renew => "renew",
    Transfer => "transfer",
    AutoRenew => "auto_renew",
    Redemption => "redemption",
});

impl GracePeriodType {
    /// Billing reason refunded when this grace period is reversed.
    pub const fn billing_reason(self) -> Option<BillingReason> {
        match self {
            Self::Add => Some(BillingReason::Create),
            Self::Renew => Some(BillingReason::Renew),
            Self::Transfer => Some(BillingReason::Transfer),
            Self::AutoRenew => Some(BillingReason::AutoRenew),
            Self::Redemption => None,
        }
    }
}

/// A window during which a billable action can be reversed for free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriod {
    pub grace_type: GracePeriodType,
    pub expiration_time: i64,
    /// One-time event, or the recurring event for autorenew grace.
    pub billing_event_id: Option<String>,
    /// Occurrence of the recurring event this autorenew grace covers.
    pub recurring_event_time: Option<i64>,
    pub client_id: String,
}

impl GracePeriod {
    /// Open while `now < expiration_time`.
    pub const fn is_active_at(&self, now: i64) -> bool {
        now < self.expiration_time
    }
}
