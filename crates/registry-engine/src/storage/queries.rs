//! Pool-level queries for the registry database: registrar accounts,
//! reporting ranges and batch selection for scheduled work.

use std::collections::BTreeSet;

use registry_core::db::DatabaseError;

use super::db::RegistryDatabase;
use super::models::{BillingEventRow, HistoryRow, RegistrarRow, convert_all};
use crate::model::{BillingEvent, HistoryEntry, Registrar, RegistrarState};

/// Parameters for creating a registrar account.
pub struct NewRegistrarParams<'a> {
    pub client_id: &'a str,
    pub password_hash: &'a str,
    pub state: RegistrarState,
    pub iana_id: Option<i64>,
    pub allowed_tlds: &'a BTreeSet<String>,
    pub now: i64,
}

impl RegistryDatabase {
    // =========================================================================
    // Registrar queries
    // =========================================================================

    /// Create a registrar account.
    pub async fn create_registrar(
        &self,
        params: &NewRegistrarParams<'_>,
    ) -> Result<Registrar, DatabaseError> {
        let allowed_tlds = serde_json::to_string(params.allowed_tlds)?;

        sqlx::query(
            "INSERT INTO registrars (client_id, password_hash, state, iana_id, allowed_tlds, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(params.client_id)
        .bind(params.password_hash)
        .bind(params.state.as_str())
        .bind(params.iana_id)
        .bind(&allowed_tlds)
        .bind(params.now)
        .bind(params.now)
        .execute(self.pool())
        .await?;

        self.get_registrar(params.client_id).await
    }

    /// Get a registrar by client id.
    pub async fn get_registrar(&self, client_id: &str) -> Result<Registrar, DatabaseError> {
        self.find_registrar(client_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Registrar {client_id}")))
    }

    pub async fn find_registrar(&self, client_id: &str) -> Result<Option<Registrar>, DatabaseError> {
        sqlx::query_as::<_, RegistrarRow>("SELECT * FROM registrars WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(self.pool())
            .await?
            .map(Registrar::try_from)
            .transpose()
    }

    /// Change a registrar's account state. Returns false if unknown.
    pub async fn set_registrar_state(
        &self,
        client_id: &str,
        state: RegistrarState,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE registrars SET state = ?, updated_at = ? WHERE client_id = ?")
                .bind(state.as_str())
                .bind(now)
                .bind(client_id)
                .execute(self.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace a registrar's TLD allowlist. Returns false if unknown.
    pub async fn set_registrar_tlds(
        &self,
        client_id: &str,
        allowed_tlds: &BTreeSet<String>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let encoded = serde_json::to_string(allowed_tlds)?;
        let result = sqlx::query(
            "UPDATE registrars SET allowed_tlds = ?, updated_at = ? WHERE client_id = ?",
        )
        .bind(&encoded)
        .bind(now)
        .bind(client_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_registrars(&self) -> Result<Vec<Registrar>, DatabaseError> {
        let rows =
            sqlx::query_as::<_, RegistrarRow>("SELECT * FROM registrars ORDER BY client_id ASC")
                .fetch_all(self.pool())
                .await?;

        convert_all(rows)
    }

    // =========================================================================
    // Reporting queries
    // =========================================================================

    /// Billing events with `start <= billing_time < end`.
    pub async fn billing_events_between(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<BillingEvent>, DatabaseError> {
        let rows = sqlx::query_as::<_, BillingEventRow>(
            "SELECT * FROM billing_events WHERE billing_time >= ? AND billing_time < ? ORDER BY billing_time ASC, id ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    /// All billing events for one resource, oldest first.
    pub async fn billing_events_for(
        &self,
        repo_id: &str,
    ) -> Result<Vec<BillingEvent>, DatabaseError> {
        let rows = sqlx::query_as::<_, BillingEventRow>(
            "SELECT * FROM billing_events WHERE repo_id = ? ORDER BY event_time ASC, rowid ASC",
        )
        .bind(repo_id)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    /// History entries with `start <= modification_time < end`.
    pub async fn history_between(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM history_entries WHERE modification_time >= ? AND modification_time < ? ORDER BY modification_time ASC, rowid ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    /// Audit trail of one resource, oldest first.
    pub async fn history_for(&self, repo_id: &str) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM history_entries WHERE repo_id = ? ORDER BY modification_time ASC, rowid ASC",
        )
        .bind(repo_id)
        .fetch_all(self.pool())
        .await?;

        convert_all(rows)
    }

    // =========================================================================
    // Scheduled work
    // =========================================================================

    /// Names of active domains whose registration expires at or before
    /// `as_of` and that still carry an autorenew obligation.
    pub async fn domains_due_for_autorenew(
        &self,
        as_of: i64,
        limit: u32,
    ) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT unique_id FROM resources WHERE kind = 'domain' AND expiration_time <= ? AND creation_time <= ? AND deletion_time > ? AND json_extract(data, '$.details.autorenew_billing_event') IS NOT NULL ORDER BY expiration_time ASC LIMIT ?",
        )
        .bind(as_of)
        .bind(as_of)
        .bind(as_of)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}
