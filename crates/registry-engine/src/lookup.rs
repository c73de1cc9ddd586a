//! Read-only lookup by unique id, for search and read services.
//!
//! Unlike the flows this sees deleted resources too, but only their sponsor
//! or a superuser may. Everyone else sees active resources with secrets
//! removed.

use registry_core::RetryPolicy;
use tracing::{debug, instrument};

use crate::error::{FlowError, FlowResult};
use crate::model::{EppResource, ResourceKind};
use crate::session::Session;
use crate::storage::RegistryDatabase;

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer<'a> {
    Anonymous,
    Registrar(&'a str),
    Superuser,
}

impl<'a> Viewer<'a> {
    pub fn from_session(session: &'a Session) -> Self {
        match session.current_client_id() {
            Some(_) if session.is_superuser() => Self::Superuser,
            Some(client_id) => Self::Registrar(client_id),
            None => Self::Anonymous,
        }
    }

    fn sponsors(&self, resource: &EppResource) -> bool {
        match self {
            Self::Superuser => true,
            Self::Registrar(client_id) => resource.current_sponsor_client_id == *client_id,
            Self::Anonymous => false,
        }
    }
}

/// What `viewer` may see of `resource` at `now`, if anything.
pub fn visible_to(viewer: Viewer<'_>, resource: EppResource, now: i64) -> Option<EppResource> {
    let sponsor = viewer.sponsors(&resource);
    match (resource.is_active_at(now), sponsor) {
        (_, true) => Some(resource),
        (true, false) => Some(resource.redacted()),
        (false, false) => None,
    }
}

/// Most recent version of `unique_id` created by `now`, filtered for
/// `viewer`.
#[instrument(skip(db, retry), fields(op = "lookup"))]
pub async fn lookup(
    db: &RegistryDatabase,
    retry: &RetryPolicy,
    viewer: Viewer<'_>,
    kind: ResourceKind,
    unique_id: &str,
    now: i64,
) -> FlowResult<EppResource> {
    let found = retry
        .run("lookup", FlowError::is_transient, || async {
            // The read may settle an expired transfer, so it commits.
            let mut txn = db.begin().await?;
            let found = txn.find_most_recent(kind, unique_id, now).await?;
            txn.commit().await?;
            Ok::<_, FlowError>(found)
        })
        .await
        .map_err(FlowError::exhausted)?;

    let visible = found.and_then(|r| visible_to(viewer, r, now));
    debug!(found = visible.is_some(), "Lookup complete");
    visible.ok_or_else(|| FlowError::not_found(kind, unique_id))
}
