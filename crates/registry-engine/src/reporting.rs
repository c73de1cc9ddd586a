//! Reads for billing and audit reporting.
//!
//! Reports run outside any command, so each read goes through the retry
//! policy on its own.

use std::future::Future;

use registry_core::RetryPolicy;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::model::{BillingEvent, HistoryEntry};
use crate::storage::{DatabaseError, RegistryDatabase};

#[derive(Clone)]
pub struct Reporter {
    db: RegistryDatabase,
    retry: RetryPolicy,
}

impl Reporter {
    pub const fn new(db: RegistryDatabase, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    async fn read<T, F, Fut>(&self, operation: &str, op: F) -> FlowResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        self.retry
            .run(operation, FlowError::is_transient, || async {
                op().await.map_err(FlowError::from)
            })
            .await
            .map_err(FlowError::exhausted)
    }

    /// Billing events with `start <= billing_time < end`.
    pub async fn billing_events_between(
        &self,
        start: i64,
        end: i64,
    ) -> FlowResult<Vec<BillingEvent>> {
        let events = self
            .read("billing_report", || self.db.billing_events_between(start, end))
            .await?;
        debug!(count = events.len(), start, end, "Billing events read");
        Ok(events)
    }

    pub async fn billing_events_for(&self, repo_id: &str) -> FlowResult<Vec<BillingEvent>> {
        self.read("billing_for_resource", || self.db.billing_events_for(repo_id))
            .await
    }

    /// History entries with `start <= modification_time < end`.
    pub async fn history_between(&self, start: i64, end: i64) -> FlowResult<Vec<HistoryEntry>> {
        let entries = self
            .read("history_report", || self.db.history_between(start, end))
            .await?;
        debug!(count = entries.len(), start, end, "History entries read");
        Ok(entries)
    }

    pub async fn history_for(&self, repo_id: &str) -> FlowResult<Vec<HistoryEntry>> {
        self.read("history_for_resource", || self.db.history_for(repo_id))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use registry_core::clock::DAY;

    use super::*;
    use crate::model::{BillingReason, HistoryType};
    use crate::test_helpers::{Registry, T0, THE_REGISTRAR, test_config};

    #[tokio::test]
    async fn reports_cover_half_open_ranges() {
        let registry = Registry::new().await;
        let mut session = registry.login(THE_REGISTRAR).await;
        registry.create_domain(&mut session, "foo.example", 1).await;
        let reporter = Reporter::new(registry.db.clone(), test_config().retry);

        // The create is billed when its add grace period ends.
        let billed = reporter
            .billing_events_between(T0, T0 + 5 * DAY + 1)
            .await
            .unwrap();
        assert_eq!(billed.len(), 1);
        assert_eq!(billed[0].reason, BillingReason::Create);
        assert!(
            reporter
                .billing_events_between(T0, T0 + 5 * DAY)
                .await
                .unwrap()
                .is_empty()
        );

        let history = reporter.history_between(T0, T0 + 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].history_type, HistoryType::DomainCreate);
        assert!(reporter.history_between(T0 + 1, T0 + DAY).await.unwrap().is_empty());

        let repo_id = history[0].repo_id.clone();
        assert_eq!(reporter.history_for(&repo_id).await.unwrap().len(), 1);
        assert_eq!(reporter.billing_events_for(&repo_id).await.unwrap().len(), 2);
    }
}
