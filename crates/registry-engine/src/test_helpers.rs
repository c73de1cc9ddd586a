//! Shared fixtures: an in-memory registry with two registrars on `.example`.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use registry_core::{Config, FakeClock, RetryPolicy, TldPolicy};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::dns::{DnsQueue, DnsUpdate};
use crate::error::FlowResult;
use crate::flows::{
    Attributes, Command, ContactCreate, DomainCreate, FlowDispatcher, FlowResponse, HostCreate,
    ObjectType, Verb,
};
use crate::metrics::{CommandMetrics, CommandRecord};
use crate::model::{BillingEvent, EppResource, HistoryType, RegistrarState, ResourceKind};
use crate::session::{AccessPath, Authenticator, Credentials, NewRegistrar, Session, create_registrar};
use crate::storage::RegistryDatabase;

/// 2026-01-01T00:00:00Z.
pub const T0: i64 = 1_767_225_600;

pub const TLD: &str = "example";
pub const THE_REGISTRAR: &str = "TheRegistrar";
pub const NEW_REGISTRAR: &str = "NewRegistrar";
pub const AUTH_INFO: &str = "2fooBAR";

fn password_for(client_id: &str) -> &'static str {
    if client_id == THE_REGISTRAR {
        "password1"
    } else {
        "password2"
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default().with_tld(TLD, TldPolicy::default());
    config.retry = RetryPolicy {
        initial_delay_ms: 1,
        max_delay_ms: 5,
        multiplier: 2.0,
        max_attempts: 5,
    };
    config
}

/// Keeps every command record for inspection.
#[derive(Default)]
pub struct RecordedMetrics(Mutex<Vec<CommandRecord>>);

impl RecordedMetrics {
    pub fn take(&self) -> Vec<CommandRecord> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl CommandMetrics for RecordedMetrics {
    fn record(&self, record: &CommandRecord) {
        self.0.lock().unwrap().push(record.clone());
    }
}

pub struct Registry {
    pub db: RegistryDatabase,
    pub clock: Arc<FakeClock>,
    pub dispatcher: FlowDispatcher,
    pub dns: UnboundedReceiver<DnsUpdate>,
    pub metrics: Arc<RecordedMetrics>,
}

impl Registry {
    pub async fn new() -> Self {
        Self::with_db(RegistryDatabase::open_in_memory().await.unwrap()).await
    }

    pub async fn with_db(db: RegistryDatabase) -> Self {
        let config = Arc::new(test_config());
        let clock = Arc::new(FakeClock::new(T0));
        let (queue, dns) = DnsQueue::new();
        for client_id in [THE_REGISTRAR, NEW_REGISTRAR] {
            create_registrar(
                &db,
                &NewRegistrar {
                    client_id,
                    password: password_for(client_id),
                    state: RegistrarState::Active,
                    iana_id: None,
                    allowed_tlds: BTreeSet::from([TLD.to_string()]),
                },
                T0,
            )
            .await
            .unwrap();
        }
        let metrics = Arc::new(RecordedMetrics::default());
        let dispatcher = FlowDispatcher::new(db.clone(), config, clock.clone(), Arc::new(queue))
            .with_metrics(metrics.clone());
        Self {
            db,
            clock,
            dispatcher,
            dns,
            metrics,
        }
    }

    pub fn now(&self) -> i64 {
        self.dispatcher.now()
    }

    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.db.clone(), self.dispatcher.config().session.clone())
    }

    async fn login_via(&self, client_id: &str, path: AccessPath) -> Session {
        let mut session = Session::new(path);
        let credentials = Credentials {
            client_id: client_id.to_string(),
            password: password_for(client_id).to_string(),
            ..Credentials::default()
        };
        self.authenticator()
            .login(&mut session, &credentials, "1.0", "en")
            .await
            .unwrap();
        session
    }

    pub async fn login(&self, client_id: &str) -> Session {
        self.login_via(client_id, AccessPath::Registrar).await
    }

    pub async fn superuser(&self, client_id: &str) -> Session {
        self.login_via(client_id, AccessPath::Administrative).await
    }

    pub async fn run(&self, session: &mut Session, command: Command) -> FlowResult<FlowResponse> {
        self.dispatcher.dispatch(session, &command).await
    }

    pub fn drain_dns(&mut self) -> Vec<DnsUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = self.dns.try_recv() {
            updates.push(update);
        }
        updates
    }

    pub async fn create_contact(&self, session: &mut Session, contact_id: &str) {
        let command = Command::new(ObjectType::Contact, Verb::Create, contact_id).with_attributes(
            Attributes::ContactCreate(ContactCreate {
                name: "John Doe".into(),
                email: "jd@example.tld".into(),
                voice: None,
                auth_info: AUTH_INFO.into(),
            }),
        );
        self.run(session, command).await.unwrap();
    }

    pub async fn create_host(&self, session: &mut Session, name: &str, addresses: &[&str]) {
        let inet_addresses = addresses
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap())
            .collect();
        let command = Command::new(ObjectType::Host, Verb::Create, name)
            .with_attributes(Attributes::HostCreate(HostCreate { inet_addresses }));
        self.run(session, command).await.unwrap();
    }

    /// Create `name` for `years`, returning its expiration time.
    pub async fn create_domain(&self, session: &mut Session, name: &str, years: u32) -> i64 {
        match self
            .run(session, domain_create(name, years, &[]))
            .await
            .unwrap()
        {
            FlowResponse::Created {
                expiration_time: Some(expiration),
                ..
            } => expiration,
            other => panic!("unexpected response {other:?}"),
        }
    }

    /// Current state of a resource, as the flows would see it now.
    pub async fn load(&self, kind: ResourceKind, unique_id: &str) -> EppResource {
        let mut txn = self.db.begin().await.unwrap();
        let resource = txn
            .find_most_recent(kind, unique_id, self.now())
            .await
            .unwrap()
            .unwrap();
        txn.commit().await.unwrap();
        resource
    }

    pub async fn domain(&self, name: &str) -> EppResource {
        self.load(ResourceKind::Domain, name).await
    }

    pub async fn billing(&self, repo_id: &str) -> Vec<BillingEvent> {
        self.db.billing_events_for(repo_id).await.unwrap()
    }

    pub async fn history_types(&self, repo_id: &str) -> Vec<HistoryType> {
        self.db
            .history_for(repo_id)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.history_type)
            .collect()
    }

    /// Billing events by id, for looking up voided flags.
    pub async fn billing_by_id(&self, repo_id: &str) -> HashMap<String, BillingEvent> {
        self.billing(repo_id)
            .await
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect()
    }
}

pub fn domain_create(name: &str, years: u32, nameservers: &[&str]) -> Command {
    Command::new(ObjectType::Domain, Verb::Create, name).with_attributes(Attributes::DomainCreate(
        DomainCreate {
            period_years: years,
            registrant: None,
            contacts: Vec::new(),
            nameservers: nameservers.iter().map(|n| (*n).to_string()).collect(),
            ds_data: BTreeSet::new(),
            auth_info: AUTH_INFO.into(),
        },
    ))
}

/// UTC date of a timestamp, as renew commands quote it.
pub fn date_of(time: i64) -> chrono::NaiveDate {
    DateTime::from_timestamp(time, 0).unwrap().date_naive()
}
