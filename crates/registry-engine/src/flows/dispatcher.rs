//! Routes commands to flows and runs each in one retried transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use registry_core::{Clock, Config};
use tracing::{error, info, instrument, warn};

use super::command::{Command, ObjectType, Verb};
use super::context::FlowContext;
use super::{FlowOutcome, contact, domain, host, poll};
use crate::dns::DnsNotifier;
use crate::error::{ErrorClass, FlowError, FlowResult};
use crate::metrics::{CommandMetrics, CommandRecord, LogMetrics};
use crate::model::{EppResource, PollMessage, TransferData};
use crate::session::Session;
use crate::storage::RegistryDatabase;

/// Result of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlowResponse {
    #[default]
    Success,
    Created {
        repo_id: String,
        /// Registration expiration for domains.
        expiration_time: Option<i64>,
    },
    Deleted {
        /// True when the resource entered pending delete instead of going
        /// away immediately.
        pending: bool,
    },
    Renewed {
        expiration_time: i64,
    },
    Resource(Box<EppResource>),
    Transfer(TransferData),
    Poll {
        message: Option<PollMessage>,
        queue_len: i64,
    },
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Domain(Verb),
    Host(Verb),
    Contact(Verb),
    Poll(Verb),
    Logout,
}

impl Route {
    fn for_command(command: &Command) -> FlowResult<Self> {
        use Verb::{
            Create, Delete, Info, Logout, PollAck, PollRequest, Renew, TransferApprove,
            TransferCancel, TransferQuery, TransferReject, TransferRequest, Update,
        };
        let transfer = [
            TransferRequest,
            TransferApprove,
            TransferReject,
            TransferCancel,
            TransferQuery,
        ];
        let verb = command.verb;
        let route = match command.object_type {
            ObjectType::Domain
                if matches!(verb, Create | Update | Delete | Renew | Info)
                    || transfer.contains(&verb) =>
            {
                Some(Self::Domain(verb))
            }
            ObjectType::Host if matches!(verb, Create | Update | Delete | Info) => {
                Some(Self::Host(verb))
            }
            ObjectType::Contact
                if matches!(verb, Create | Update | Delete | Info) || transfer.contains(&verb) =>
            {
                Some(Self::Contact(verb))
            }
            ObjectType::Poll if matches!(verb, PollRequest | PollAck) => Some(Self::Poll(verb)),
            ObjectType::Session if verb == Logout => Some(Self::Logout),
            _ => None,
        };
        route.ok_or_else(|| FlowError::UnimplementedCommand {
            object_type: command.object_type.to_string(),
            verb: verb.to_string(),
        })
    }
}

/// Runs commands for logged-in sessions.
#[derive(Clone)]
pub struct FlowDispatcher {
    db: RegistryDatabase,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    dns: Arc<dyn DnsNotifier>,
    metrics: Arc<dyn CommandMetrics>,
}

impl FlowDispatcher {
    pub fn new(
        db: RegistryDatabase,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        dns: Arc<dyn DnsNotifier>,
    ) -> Self {
        Self {
            db,
            config,
            clock,
            dns,
            metrics: Arc::new(LogMetrics),
        }
    }

    /// Send per-command records to `metrics` instead of the log.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn CommandMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub const fn db(&self) -> &RegistryDatabase {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub(crate) fn dns(&self) -> &dyn DnsNotifier {
        self.dns.as_ref()
    }

    /// Run `command` for `session`.
    ///
    /// Transient failures are retried with backoff inside fresh transactions;
    /// when attempts run out the command fails with `ServiceUnavailable` and
    /// nothing has been applied. Every call, failed or not, yields one
    /// [`CommandRecord`].
    #[instrument(
        skip(self, session, command),
        fields(
            session = %session.id(),
            object = %command.object_type,
            verb = %command.verb,
            target = %command.target_id,
        )
    )]
    pub async fn dispatch(
        &self,
        session: &mut Session,
        command: &Command,
    ) -> FlowResult<FlowResponse> {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);
        let mut acting = None;
        let result = self
            .execute(session, command, &attempts, &mut acting)
            .await;

        let failure = result.as_ref().err();
        self.metrics.record(&CommandRecord {
            object_type: command.object_type,
            verb: command.verb,
            client_id: acting,
            outcome: failure.map(FlowError::class),
            attempts: attempts.into_inner(),
            duration: started.elapsed(),
            integrity_violation: failure.is_some_and(FlowError::is_integrity_violation),
        });
        result
    }

    async fn execute(
        &self,
        session: &mut Session,
        command: &Command,
        attempts: &AtomicU32,
        acting: &mut Option<String>,
    ) -> FlowResult<FlowResponse> {
        let session_client = session.require_client_id()?.to_string();
        *acting = Some(session_client.clone());
        let route = Route::for_command(command)?;
        if route == Route::Logout {
            session.logout()?;
            info!(client_id = %session_client, "Registrar logged out");
            return Ok(FlowResponse::LoggedOut);
        }

        let superuser = session.is_superuser();
        let client_id = match command.requested_client_id.as_deref() {
            Some(requested) if requested != session_client => {
                if !superuser {
                    return Err(FlowError::NotAuthorized(format!(
                        "{session_client} may not act as {requested}"
                    )));
                }
                requested.to_string()
            }
            _ => session_client,
        };
        *acting = Some(client_id.clone());
        let ctx = FlowContext {
            client_id: &client_id,
            superuser,
            command,
            config: &self.config,
        };

        let result = self
            .config
            .retry
            .run("flow", FlowError::is_transient, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.run_once(route, &ctx)
            })
            .await;

        match result {
            Ok(outcome) => {
                for (unique_id, kind) in &outcome.dns {
                    self.dns.resource_dns_data_changed(unique_id, *kind);
                }
                Ok(outcome.response)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Giving up after repeated contention");
                Err(FlowError::ServiceUnavailable(e.to_string()))
            }
            Err(e) => {
                if e.class() == ErrorClass::Internal {
                    error!(error = %e, "Flow failed");
                }
                Err(e)
            }
        }
    }

    async fn run_once(&self, route: Route, ctx: &FlowContext<'_>) -> FlowResult<FlowOutcome> {
        let now = self.clock.now();
        let mut txn = self.db.begin().await?;
        let mut outcome = match route {
            Route::Domain(verb) => domain::run(verb, ctx, &mut txn, now).await?,
            Route::Host(verb) => host::run(verb, ctx, &mut txn, now).await?,
            Route::Contact(verb) => contact::run(verb, ctx, &mut txn, now).await?,
            Route::Poll(verb) => poll::run(verb, ctx, &mut txn, now).await?,
            Route::Logout => FlowOutcome::default(),
        };
        txn.save(&mut outcome.changes).await?;
        txn.commit().await?;
        Ok(outcome)
    }
}
