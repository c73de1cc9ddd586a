//! Scheduled autorenewal of expired registrations.
//!
//! Each due domain is advanced one year in its own retried transaction and
//! gains an autorenew grace period pointing at the recurring event that
//! bills the occurrence. Domains several years behind are caught up over
//! successive passes.

use registry_core::clock::{format_time, plus_years};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::dispatcher::FlowDispatcher;
use crate::error::{FlowError, FlowResult};
use crate::model::{GracePeriod, GracePeriodType, HistoryEntry, HistoryType, ResourceKind, new_id};
use crate::storage::Changeset;

/// Totals from one autorenew run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AutorenewSummary {
    /// Registration years added across all domains.
    pub renewed: u64,
    /// Domains that were due when listed but no longer needed renewing.
    pub skipped: u64,
    /// Domains that failed permanently; the run moves on without them.
    pub failed: u64,
}

impl FlowDispatcher {
    /// Autorenew every domain expired at `as_of`, `batch` at a time.
    #[instrument(skip(self), fields(as_of = %format_time(as_of)))]
    pub async fn run_autorenew(&self, as_of: i64, batch: u32) -> FlowResult<AutorenewSummary> {
        let mut summary = AutorenewSummary::default();
        loop {
            let due = self
                .config()
                .retry
                .run("autorenew_scan", FlowError::is_transient, || async {
                    Ok::<_, FlowError>(self.db().domains_due_for_autorenew(as_of, batch).await?)
                })
                .await?;
            if due.is_empty() {
                break;
            }

            let mut progressed = false;
            for name in &due {
                let result = self
                    .config()
                    .retry
                    .run("autorenew", FlowError::is_transient, || {
                        self.autorenew_one(name, as_of)
                    })
                    .await;
                match result {
                    Ok(true) => {
                        summary.renewed += 1;
                        progressed = true;
                    }
                    Ok(false) => summary.skipped += 1,
                    Err(e) => {
                        warn!(domain = %name, error = %e, "Autorenew failed");
                        summary.failed += 1;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        info!(
            renewed = summary.renewed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Autorenew run complete"
        );
        Ok(summary)
    }

    /// Advance one domain by a year. False when it was no longer due.
    async fn autorenew_one(&self, name: &str, as_of: i64) -> FlowResult<bool> {
        let mut txn = self.db().begin().await?;
        let Some(mut resource) = txn.find_active(ResourceKind::Domain, name, as_of).await? else {
            return Ok(false);
        };
        let sponsor = resource.current_sponsor_client_id.clone();
        let due = resource.domain_mut().and_then(|domain| {
            let event_id = domain.autorenew_billing_event.clone()?;
            // A transfer settled by the read above may already have moved it.
            (domain.registration_expiration_time <= as_of).then_some((domain, event_id))
        });
        let Some((domain, event_id)) = due else {
            txn.commit().await?;
            return Ok(false);
        };
        let expiration = domain.registration_expiration_time;
        let Some(policy) = self.config().tld(&domain.tld) else {
            warn!(domain = %name, tld = %domain.tld, "No policy for TLD, not renewing");
            return Ok(false);
        };

        domain.registration_expiration_time = plus_years(expiration, 1)?;
        domain.grace_periods.push(GracePeriod {
            grace_type: GracePeriodType::AutoRenew,
            expiration_time: expiration + policy.autorenew_grace_period_secs,
            billing_event_id: Some(event_id),
            recurring_event_time: Some(expiration),
            client_id: sponsor.clone(),
        });
        let touched_at = resource.last_update_time.max(expiration);
        resource.touch(&sponsor, touched_at);

        let mut entry = HistoryEntry::new(
            new_id(),
            HistoryType::DomainAutorenew,
            &sponsor,
            expiration,
            resource.clone(),
        );
        entry.requested_by_registrar = false;
        entry.period_years = Some(1);

        let mut changes = Changeset {
            resources: vec![resource],
            history: vec![entry],
            ..Changeset::default()
        };
        txn.save(&mut changes).await?;
        txn.commit().await?;
        info!(domain = %name, from = %format_time(expiration), "Domain autorenewed");
        Ok(true)
    }
}
