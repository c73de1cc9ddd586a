//! Transactional access to resources and the records hanging off them.
//!
//! Every command runs in one [`StoreTxn`]. Reads are as of an explicit time;
//! writes are collected into a [`Changeset`] and applied with [`StoreTxn::save`].
//! Dropping the transaction without [`StoreTxn::commit`] rolls everything back.

use registry_core::clock::END_OF_TIME;
use registry_core::db::DatabaseError;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, error, info};

use super::models::{BillingEventRow, PollMessageRow, RegistrarRow, ResourceRow};
use crate::model::{
    BillingEvent, EppResource, HistoryEntry, PollMessage, Registrar, ResourceKind,
};
use crate::transfer;

/// Change to an already stored billing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingUpdate {
    /// Mark a one-time event as reversed.
    Void(String),
    /// Stop a recurring event from producing occurrences at or after `at`.
    EndRecurrence { id: String, at: i64 },
}

/// Change to an already stored poll message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    /// Stop an autorenew message at `at`; removed outright if nothing is
    /// deliverable before then.
    EndAutorenew { id: String, at: i64 },
    /// Move an autorenew message to its next occurrence.
    Advance { id: String, event_time: i64 },
    Delete(String),
}

/// The writes one flow commits atomically.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub resources: Vec<EppResource>,
    pub history: Vec<HistoryEntry>,
    pub billing_events: Vec<BillingEvent>,
    pub billing_updates: Vec<BillingUpdate>,
    pub poll_messages: Vec<PollMessage>,
    pub poll_updates: Vec<PollUpdate>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
            && self.history.is_empty()
            && self.billing_events.is_empty()
            && self.billing_updates.is_empty()
            && self.poll_messages.is_empty()
            && self.poll_updates.is_empty()
    }

    /// Take back a saved resource (with its new revision) by repo id.
    pub fn take_resource(&mut self, repo_id: &str) -> Option<EppResource> {
        let index = self.resources.iter().position(|r| r.repo_id == repo_id)?;
        Some(self.resources.swap_remove(index))
    }
}

const RESOURCE_COLUMNS: &str = "data, revision";

pub struct StoreTxn {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTxn {
    pub(super) const fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    // =========================================================================
    // Resource reads
    // =========================================================================

    /// Most recent version of `unique_id` active at `as_of`, with any expired
    /// pending transfer applied.
    pub async fn find_active(
        &mut self,
        kind: ResourceKind,
        unique_id: &str,
        as_of: i64,
    ) -> Result<Option<EppResource>, DatabaseError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources \
             WHERE kind = ? AND unique_id = ? AND creation_time <= ? AND deletion_time > ? \
             ORDER BY creation_time DESC LIMIT 1"
        ))
        .bind(kind.as_str())
        .bind(unique_id)
        .bind(as_of)
        .bind(as_of)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut resource = EppResource::try_from(row)?;
        self.settle_transfer(&mut resource, as_of).await?;
        Ok(Some(resource))
    }

    /// Like [`Self::find_active`] but absence is an error.
    pub async fn load_active(
        &mut self,
        kind: ResourceKind,
        unique_id: &str,
        as_of: i64,
    ) -> Result<EppResource, DatabaseError> {
        self.find_active(kind, unique_id, as_of)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{kind} {unique_id}")))
    }

    /// Most recent version created at or before `as_of`, deleted or not.
    pub async fn find_most_recent(
        &mut self,
        kind: ResourceKind,
        unique_id: &str,
        as_of: i64,
    ) -> Result<Option<EppResource>, DatabaseError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources \
             WHERE kind = ? AND unique_id = ? AND creation_time <= ? \
             ORDER BY creation_time DESC LIMIT 1"
        ))
        .bind(kind.as_str())
        .bind(unique_id)
        .bind(as_of)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut resource = EppResource::try_from(row)?;
        if resource.is_active_at(as_of) {
            self.settle_transfer(&mut resource, as_of).await?;
        }
        Ok(Some(resource))
    }

    /// A resource by repo id regardless of deletion.
    pub async fn load_any(&mut self, repo_id: &str) -> Result<EppResource, DatabaseError> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE repo_id = ?"
        ))
        .bind(repo_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Resource {repo_id}")))?;

        EppResource::try_from(row)
    }

    /// A resource by repo id; if still active at `as_of`, any expired pending
    /// transfer is applied first.
    pub async fn load_settled(
        &mut self,
        repo_id: &str,
        as_of: i64,
    ) -> Result<EppResource, DatabaseError> {
        let mut resource = self.load_any(repo_id).await?;
        if resource.is_active_at(as_of) {
            self.settle_transfer(&mut resource, as_of).await?;
        }
        Ok(resource)
    }

    /// Whether any resource active at `as_of` references `repo_id`.
    pub async fn is_linked(&mut self, repo_id: &str, as_of: i64) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM resource_links l JOIN resources r ON r.repo_id = l.from_repo_id \
             WHERE l.to_repo_id = ? AND r.creation_time <= ? AND r.deletion_time > ? LIMIT 1",
        )
        .bind(repo_id)
        .bind(as_of)
        .bind(as_of)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.is_some())
    }

    /// Apply an expired pending transfer exactly once. A concurrent reader
    /// that applied it first makes our revision check fail, and the retry
    /// then sees the settled record.
    async fn settle_transfer(
        &mut self,
        resource: &mut EppResource,
        as_of: i64,
    ) -> Result<(), DatabaseError> {
        let Some(mut changes) = transfer::settle_expired(resource, as_of) else {
            return Ok(());
        };
        info!(
            repo_id = %resource.repo_id,
            gaining = ?resource.transfer_data.gaining_client_id,
            "Applying server-approved transfer"
        );
        self.save(&mut changes).await?;
        if let Some(settled) = changes.take_resource(&resource.repo_id) {
            *resource = settled;
        }
        Ok(())
    }

    /// Registrar account, read inside the command's transaction.
    pub async fn find_registrar(
        &mut self,
        client_id: &str,
    ) -> Result<Option<Registrar>, DatabaseError> {
        sqlx::query_as::<_, RegistrarRow>("SELECT * FROM registrars WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Registrar::try_from)
            .transpose()
    }

    // =========================================================================
    // Billing and poll reads
    // =========================================================================

    pub async fn load_billing_event(&mut self, id: &str) -> Result<BillingEvent, DatabaseError> {
        sqlx::query_as::<_, BillingEventRow>("SELECT * FROM billing_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Billing event {id}")))
            .and_then(BillingEvent::try_from)
    }

    pub async fn find_poll_message(
        &mut self,
        id: &str,
    ) -> Result<Option<PollMessage>, DatabaseError> {
        sqlx::query_as::<_, PollMessageRow>("SELECT * FROM poll_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(PollMessage::try_from)
            .transpose()
    }

    /// Oldest message deliverable to `client_id` at `now`.
    pub async fn next_poll_message(
        &mut self,
        client_id: &str,
        now: i64,
    ) -> Result<Option<PollMessage>, DatabaseError> {
        sqlx::query_as::<_, PollMessageRow>(
            "SELECT * FROM poll_messages \
             WHERE client_id = ? AND event_time <= ? \
             AND (autorenew_end_time IS NULL OR event_time < autorenew_end_time) \
             ORDER BY event_time ASC, id ASC LIMIT 1",
        )
        .bind(client_id)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(PollMessage::try_from)
        .transpose()
    }

    /// Number of messages deliverable to `client_id` at `now`.
    pub async fn count_poll_messages(
        &mut self,
        client_id: &str,
        now: i64,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM poll_messages \
             WHERE client_id = ? AND event_time <= ? \
             AND (autorenew_end_time IS NULL OR event_time < autorenew_end_time)",
        )
        .bind(client_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row.0)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a changeset. Saved resources come back with their new revision.
    pub async fn save(&mut self, changes: &mut Changeset) -> Result<(), DatabaseError> {
        for resource in &mut changes.resources {
            self.save_resource(resource).await?;
        }
        for entry in &changes.history {
            self.insert_history(entry).await?;
        }
        for event in &changes.billing_events {
            self.insert_billing_event(event).await?;
        }
        for update in &changes.billing_updates {
            self.apply_billing_update(update).await?;
        }
        for message in &changes.poll_messages {
            self.insert_poll_message(message).await?;
        }
        for update in &changes.poll_updates {
            self.apply_poll_update(update).await?;
        }
        debug!(
            resources = changes.resources.len(),
            history = changes.history.len(),
            billing = changes.billing_events.len(),
            polls = changes.poll_messages.len(),
            "Changeset saved"
        );
        Ok(())
    }

    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn save_resource(&mut self, resource: &mut EppResource) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(&*resource)?;

        if resource.revision == 0 {
            sqlx::query(
                "INSERT INTO resources (repo_id, kind, unique_id, sponsor_client_id, creation_time, \
                 deletion_time, expiration_time, last_update_time, revision, data) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
            )
            .bind(&resource.repo_id)
            .bind(resource.kind().as_str())
            .bind(resource.unique_id())
            .bind(&resource.current_sponsor_client_id)
            .bind(resource.creation_time)
            .bind(resource.deletion_time)
            .bind(resource.expiration_time())
            .bind(resource.last_update_time)
            .bind(&data)
            .execute(&mut *self.tx)
            .await?;
            resource.revision = 1;
        } else {
            let stored: Option<(i64, i64)> =
                sqlx::query_as("SELECT revision, deletion_time FROM resources WHERE repo_id = ?")
                    .bind(&resource.repo_id)
                    .fetch_optional(&mut *self.tx)
                    .await?;
            let Some((stored_revision, stored_deletion)) = stored else {
                return Err(DatabaseError::NotFound(format!(
                    "Resource {}",
                    resource.repo_id
                )));
            };
            if stored_revision != resource.revision {
                return Err(DatabaseError::Contention(format!(
                    "Resource {} changed concurrently (revision {} != {})",
                    resource.repo_id, stored_revision, resource.revision
                )));
            }
            if stored_deletion != END_OF_TIME && resource.deletion_time < stored_deletion {
                error!(
                    repo_id = %resource.repo_id,
                    stored = stored_deletion,
                    attempted = resource.deletion_time,
                    "Refusing to move deletion time earlier"
                );
                return Err(DatabaseError::Invariant(format!(
                    "Deletion time of {} may not move earlier",
                    resource.repo_id
                )));
            }

            let result = sqlx::query(
                "UPDATE resources SET unique_id = ?, sponsor_client_id = ?, deletion_time = ?, \
                 expiration_time = ?, last_update_time = ?, data = ?, revision = revision + 1 \
                 WHERE repo_id = ? AND revision = ?",
            )
            .bind(resource.unique_id())
            .bind(&resource.current_sponsor_client_id)
            .bind(resource.deletion_time)
            .bind(resource.expiration_time())
            .bind(resource.last_update_time)
            .bind(&data)
            .bind(&resource.repo_id)
            .bind(resource.revision)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DatabaseError::Contention(format!(
                    "Resource {} changed concurrently",
                    resource.repo_id
                )));
            }
            resource.revision += 1;
        }

        sqlx::query("DELETE FROM resource_links WHERE from_repo_id = ?")
            .bind(&resource.repo_id)
            .execute(&mut *self.tx)
            .await?;
        for target in resource.linked_repo_ids() {
            sqlx::query("INSERT INTO resource_links (from_repo_id, to_repo_id) VALUES (?, ?)")
                .bind(&resource.repo_id)
                .bind(&target)
                .execute(&mut *self.tx)
                .await?;
        }

        Ok(())
    }

    async fn insert_history(&mut self, entry: &HistoryEntry) -> Result<(), DatabaseError> {
        let snapshot = serde_json::to_string(&entry.snapshot)?;
        sqlx::query(
            "INSERT INTO history_entries (id, repo_id, history_type, modification_time, client_id, \
             period_years, reason, requested_by_registrar, client_transaction_id, snapshot) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.repo_id)
        .bind(entry.history_type.as_str())
        .bind(entry.modification_time)
        .bind(&entry.client_id)
        .bind(entry.period_years.map(i64::from))
        .bind(&entry.reason)
        .bind(entry.requested_by_registrar)
        .bind(&entry.client_transaction_id)
        .bind(&snapshot)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_billing_event(&mut self, event: &BillingEvent) -> Result<(), DatabaseError> {
        let flags = serde_json::to_string(&event.flags)?;
        sqlx::query(
            "INSERT INTO billing_events (id, kind, reason, repo_id, target_id, client_id, cost, \
             currency, period_years, event_time, billing_time, recurrence_end_time, \
             cancelled_event_id, voided, flags, history_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.kind.as_str())
        .bind(event.reason.as_str())
        .bind(&event.repo_id)
        .bind(&event.target_id)
        .bind(&event.client_id)
        .bind(event.cost)
        .bind(&event.currency)
        .bind(i64::from(event.period_years))
        .bind(event.event_time)
        .bind(event.billing_time)
        .bind(event.recurrence_end_time)
        .bind(&event.cancelled_event_id)
        .bind(event.voided)
        .bind(&flags)
        .bind(&event.history_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn apply_billing_update(&mut self, update: &BillingUpdate) -> Result<(), DatabaseError> {
        let (result, id) = match update {
            BillingUpdate::Void(id) => (
                sqlx::query(
                    "UPDATE billing_events SET voided = 1 \
                     WHERE id = ? AND kind = 'one_time' AND voided = 0",
                )
                .bind(id)
                .execute(&mut *self.tx)
                .await?,
                id,
            ),
            BillingUpdate::EndRecurrence { id, at } => (
                sqlx::query(
                    "UPDATE billing_events SET recurrence_end_time = ? \
                     WHERE id = ? AND kind = 'recurring'",
                )
                .bind(at)
                .bind(id)
                .execute(&mut *self.tx)
                .await?,
                id,
            ),
        };
        if result.rows_affected() == 0 {
            error!(billing_event = %id, ?update, "Billing update matched no event");
            return Err(DatabaseError::Invariant(format!(
                "Billing event {id} cannot take update {update:?}"
            )));
        }
        Ok(())
    }

    async fn insert_poll_message(&mut self, message: &PollMessage) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO poll_messages (id, kind, client_id, repo_id, target_id, event_time, \
             message, autorenew_end_time, history_id) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.kind.as_str())
        .bind(&message.client_id)
        .bind(&message.repo_id)
        .bind(&message.target_id)
        .bind(message.event_time)
        .bind(&message.message)
        .bind(message.autorenew_end_time)
        .bind(&message.history_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn apply_poll_update(&mut self, update: &PollUpdate) -> Result<(), DatabaseError> {
        match update {
            PollUpdate::EndAutorenew { id, at } => {
                let removed = sqlx::query("DELETE FROM poll_messages WHERE id = ? AND event_time >= ?")
                    .bind(id)
                    .bind(at)
                    .execute(&mut *self.tx)
                    .await?;
                if removed.rows_affected() == 0 {
                    sqlx::query("UPDATE poll_messages SET autorenew_end_time = ? WHERE id = ?")
                        .bind(at)
                        .bind(id)
                        .execute(&mut *self.tx)
                        .await?;
                }
            }
            PollUpdate::Advance { id, event_time } => {
                sqlx::query("UPDATE poll_messages SET event_time = ? WHERE id = ?")
                    .bind(event_time)
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await?;
            }
            PollUpdate::Delete(id) => {
                sqlx::query("DELETE FROM poll_messages WHERE id = ?")
                    .bind(id)
                    .execute(&mut *self.tx)
                    .await?;
            }
        }
        Ok(())
    }
}
