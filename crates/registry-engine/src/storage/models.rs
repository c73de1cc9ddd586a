//! Row types for registry storage and their conversions to the domain model.

use std::collections::BTreeSet;

use registry_core::db::DatabaseError;

use crate::model::{
    BillingEvent, BillingEventKind, BillingFlag, BillingReason, EppResource, HistoryEntry,
    HistoryType, PollMessage, PollMessageKind, Registrar, RegistrarState,
};

fn parse_text<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, DatabaseError> {
    value.parse().map_err(DatabaseError::Serialization)
}

fn years(value: i64) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegistrarRow {
    pub client_id: String,
    pub password_hash: String,
    pub state: String,
    pub iana_id: Option<i64>,
    pub allowed_tlds: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<RegistrarRow> for Registrar {
    type Error = DatabaseError;

    fn try_from(row: RegistrarRow) -> Result<Self, Self::Error> {
        let state: RegistrarState = parse_text(&row.state)?;
        let allowed_tlds: BTreeSet<String> = serde_json::from_str(&row.allowed_tlds)?;
        Ok(Self {
            client_id: row.client_id,
            password_hash: row.password_hash,
            state,
            iana_id: row.iana_id,
            allowed_tlds,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResourceRow {
    pub data: String,
    pub revision: i64,
}

impl TryFrom<ResourceRow> for EppResource {
    type Error = DatabaseError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        let mut resource: Self = serde_json::from_str(&row.data)?;
        resource.revision = row.revision;
        Ok(resource)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: String,
    pub repo_id: String,
    pub history_type: String,
    pub modification_time: i64,
    pub client_id: String,
    pub period_years: Option<i64>,
    pub reason: Option<String>,
    pub requested_by_registrar: i64,
    pub client_transaction_id: Option<String>,
    pub snapshot: String,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DatabaseError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let history_type: HistoryType = parse_text(&row.history_type)?;
        Ok(Self {
            id: row.id,
            repo_id: row.repo_id,
            history_type,
            modification_time: row.modification_time,
            client_id: row.client_id,
            period_years: row.period_years.map(years).transpose()?,
            reason: row.reason,
            requested_by_registrar: row.requested_by_registrar != 0,
            client_transaction_id: row.client_transaction_id,
            snapshot: serde_json::from_str(&row.snapshot)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingEventRow {
    pub id: String,
    pub kind: String,
    pub reason: String,
    pub repo_id: String,
    pub target_id: String,
    pub client_id: String,
    pub cost: i64,
    pub currency: String,
    pub period_years: i64,
    pub event_time: i64,
    pub billing_time: i64,
    pub recurrence_end_time: Option<i64>,
    pub cancelled_event_id: Option<String>,
    pub voided: i64,
    pub flags: String,
    pub history_id: String,
}

impl TryFrom<BillingEventRow> for BillingEvent {
    type Error = DatabaseError;

    fn try_from(row: BillingEventRow) -> Result<Self, Self::Error> {
        let kind: BillingEventKind = parse_text(&row.kind)?;
        let reason: BillingReason = parse_text(&row.reason)?;
        let flags: BTreeSet<BillingFlag> = serde_json::from_str(&row.flags)?;
        Ok(Self {
            id: row.id,
            kind,
            reason,
            repo_id: row.repo_id,
            target_id: row.target_id,
            client_id: row.client_id,
            cost: row.cost,
            currency: row.currency,
            period_years: years(row.period_years)?,
            event_time: row.event_time,
            billing_time: row.billing_time,
            recurrence_end_time: row.recurrence_end_time,
            cancelled_event_id: row.cancelled_event_id,
            voided: row.voided != 0,
            flags,
            history_id: row.history_id,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollMessageRow {
    pub id: String,
    pub kind: String,
    pub client_id: String,
    pub repo_id: String,
    pub target_id: String,
    pub event_time: i64,
    pub message: String,
    pub autorenew_end_time: Option<i64>,
    pub history_id: String,
}

impl TryFrom<PollMessageRow> for PollMessage {
    type Error = DatabaseError;

    fn try_from(row: PollMessageRow) -> Result<Self, Self::Error> {
        let kind: PollMessageKind = parse_text(&row.kind)?;
        Ok(Self {
            id: row.id,
            kind,
            client_id: row.client_id,
            repo_id: row.repo_id,
            target_id: row.target_id,
            event_time: row.event_time,
            message: row.message,
            autorenew_end_time: row.autorenew_end_time,
            history_id: row.history_id,
        })
    }
}

/// Convert a batch of rows, failing on the first malformed one.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, DatabaseError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}
