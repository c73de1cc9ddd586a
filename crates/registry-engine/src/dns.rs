//! Signals to the DNS publisher.
//!
//! The engine only says which name changed; building and pushing zone data
//! is the publisher's job.

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::error::{FlowError, FlowResult};
use crate::model::ResourceKind;
use crate::storage::RegistryDatabase;

/// Receives one call per committed change to published DNS data.
pub trait DnsNotifier: Send + Sync {
    fn resource_dns_data_changed(&self, unique_id: &str, kind: ResourceKind);
}

/// A name whose DNS data must be republished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsUpdate {
    pub unique_id: String,
    pub kind: ResourceKind,
}

/// Channel-backed notifier; the publisher drains the receiving end.
#[derive(Debug, Clone)]
pub struct DnsQueue {
    tx: mpsc::UnboundedSender<DnsUpdate>,
}

impl DnsQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DnsUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DnsNotifier for DnsQueue {
    fn resource_dns_data_changed(&self, unique_id: &str, kind: ResourceKind) {
        let update = DnsUpdate {
            unique_id: unique_id.to_string(),
            kind,
        };
        if self.tx.send(update).is_err() {
            warn!(unique_id, %kind, "DNS publisher is gone, update dropped");
        } else {
            debug!(unique_id, %kind, "DNS update queued");
        }
    }
}

/// A fully qualified name: at least two non-empty labels, no trailing dot.
fn is_fully_qualified(name: &str) -> bool {
    name.contains('.') && name.split('.').all(|label| !label.is_empty())
}

/// Ask the publisher to republish an existing domain or subordinate host.
#[instrument(skip(db, notifier), fields(op = "refresh_dns"))]
pub async fn refresh_dns(
    db: &RegistryDatabase,
    notifier: &dyn DnsNotifier,
    name: &str,
    kind: ResourceKind,
    now: i64,
) -> FlowResult<()> {
    if kind == ResourceKind::Contact {
        return Err(FlowError::MalformedCommand(
            "contacts carry no DNS data".to_string(),
        ));
    }
    if !is_fully_qualified(name) {
        return Err(FlowError::MalformedCommand(format!(
            "{name} is not a fully qualified name"
        )));
    }

    let mut txn = db.begin().await?;
    let resource = txn
        .find_active(kind, name, now)
        .await?
        .ok_or_else(|| FlowError::not_found(kind, name))?;
    txn.commit().await?;

    if resource
        .host()
        .is_some_and(|h| h.superordinate_domain.is_none())
    {
        return Err(FlowError::MalformedCommand(format!(
            "{name} is not a subordinate host"
        )));
    }

    notifier.resource_dns_data_changed(name, kind);
    info!(name, %kind, "DNS refresh requested");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_qualified_names() {
        assert!(is_fully_qualified("example.tld"));
        assert!(is_fully_qualified("ns1.example.tld"));
        assert!(!is_fully_qualified("tld"));
        assert!(!is_fully_qualified("example.tld."));
        assert!(!is_fully_qualified(".example.tld"));
    }

    #[tokio::test]
    async fn queue_delivers_in_order() {
        let (queue, mut rx) = DnsQueue::new();
        queue.resource_dns_data_changed("a.example", ResourceKind::Domain);
        queue.resource_dns_data_changed("ns1.a.example", ResourceKind::Host);
        assert_eq!(
            rx.recv().await,
            Some(DnsUpdate {
                unique_id: "a.example".into(),
                kind: ResourceKind::Domain
            })
        );
        assert_eq!(rx.recv().await.map(|u| u.kind), Some(ResourceKind::Host));
    }

    #[test]
    fn closed_queue_does_not_panic() {
        let (queue, rx) = DnsQueue::new();
        drop(rx);
        queue.resource_dns_data_changed("a.example", ResourceKind::Domain);
    }
}
