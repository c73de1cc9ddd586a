//! Registry administration tool
//!
//! Operator entry point: manages registrar accounts, runs scheduled
//! autorenewal, requests DNS republication and exports reporting data.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use registry_core::clock::parse_time;
use registry_core::config::load_config;
use registry_core::tracing_init::init_tracing;
use registry_core::{Clock, SystemClock};

use registry_engine::dns::{DnsQueue, refresh_dns};
use registry_engine::flows::FlowDispatcher;
use registry_engine::model::{RegistrarState, ResourceKind};
use registry_engine::reporting::Reporter;
use registry_engine::session::{NewRegistrar, create_registrar};
use registry_engine::storage::RegistryDatabase;

#[derive(Parser, Debug)]
#[command(name = "registry-admin")]
#[command(version, about = "Registry administration - registrars, autorenew, DNS, reports")]
struct Args {
    /// Explicit settings file, layered over the global one.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to `SQLite` database file.
    #[arg(long, env = "REGISTRY_DATABASE_PATH")]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// OpenTelemetry OTLP endpoint for metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "REGISTRY_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage registrar accounts.
    Registrar {
        #[command(subcommand)]
        action: RegistrarAction,
    },
    /// Renew every registration that has expired.
    Autorenew {
        /// Renew as of this RFC 3339 time instead of now.
        #[arg(long)]
        as_of: Option<String>,
        /// Domains listed per pass.
        #[arg(long, default_value_t = 100)]
        batch: u32,
    },
    /// Ask the DNS publisher to republish a name.
    DnsRefresh {
        name: String,
        #[arg(long, value_enum, default_value_t = DnsKind::Domain)]
        kind: DnsKind,
    },
    /// Export billing events or history entries as JSON lines.
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        /// Inclusive RFC 3339 start.
        #[arg(long)]
        start: String,
        /// Exclusive RFC 3339 end.
        #[arg(long)]
        end: String,
    },
}

#[derive(Subcommand, Debug)]
enum RegistrarAction {
    /// Create a registrar account.
    Add {
        client_id: String,
        #[arg(long, env = "REGISTRY_REGISTRAR_PASSWORD")]
        password: String,
        #[arg(long, default_value = "active")]
        state: RegistrarState,
        #[arg(long)]
        iana_id: Option<i64>,
        /// TLD the registrar may register under; repeat for several.
        #[arg(long = "tld")]
        tlds: Vec<String>,
    },
    /// Change a registrar's account state.
    State {
        client_id: String,
        state: RegistrarState,
    },
    /// Replace a registrar's TLD allowlist.
    Tlds {
        client_id: String,
        tlds: Vec<String>,
    },
    List,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DnsKind {
    Domain,
    Host,
}

impl From<DnsKind> for ResourceKind {
    fn from(kind: DnsKind) -> Self {
        match kind {
            DnsKind::Domain => Self::Domain,
            DnsKind::Host => Self::Host,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportKind {
    Billing,
    History,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if args.db_path.is_some() {
        config.server.database_path.clone_from(&args.db_path);
    }

    let filter = format!(
        "registry_engine={level},registry_core={level}",
        level = config.server.log_level
    );
    init_tracing(&filter, args.log_json || config.server.log_json);

    #[cfg(feature = "metrics")]
    let metrics_guard = args
        .metrics_endpoint
        .as_deref()
        .map(registry_core::metrics::init_metrics)
        .transpose()?;

    let path = match &config.server.database_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %path.display(), "Opening registry database");
    let db = RegistryDatabase::open(&path).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();
    let config = Arc::new(config);

    match args.command {
        Commands::Registrar { action } => run_registrar(&db, action, now).await?,
        Commands::Autorenew { as_of, batch } => {
            let as_of = as_of.as_deref().map(parse_time).transpose()?.unwrap_or(now);
            let (dns, _rx) = DnsQueue::new();
            let dispatcher = FlowDispatcher::new(db, config, clock, Arc::new(dns));
            #[cfg(feature = "metrics")]
            let dispatcher = if metrics_guard.is_some() {
                dispatcher.with_metrics(Arc::new(registry_engine::metrics::OtelMetrics::new()))
            } else {
                dispatcher
            };
            let summary = dispatcher.run_autorenew(as_of, batch).await?;
            print_json(&summary)?;
        }
        Commands::DnsRefresh { name, kind } => {
            let (dns, mut rx) = DnsQueue::new();
            refresh_dns(&db, &dns, &name, kind.into(), now).await?;
            drop(dns);
            while let Some(update) = rx.recv().await {
                print_line(&format!("{} {}", update.kind, update.unique_id));
            }
        }
        Commands::Report { kind, start, end } => {
            let (start, end) = (parse_time(&start)?, parse_time(&end)?);
            let reporter = Reporter::new(db, config.retry.clone());
            match kind {
                ReportKind::Billing => {
                    for event in reporter.billing_events_between(start, end).await? {
                        print_json(&event)?;
                    }
                }
                ReportKind::History => {
                    for entry in reporter.history_between(start, end).await? {
                        print_json(&entry)?;
                    }
                }
            }
        }
    }

    #[cfg(feature = "metrics")]
    if let Some(guard) = metrics_guard {
        guard.shutdown()?;
    }
    Ok(())
}

async fn run_registrar(
    db: &RegistryDatabase,
    action: RegistrarAction,
    now: i64,
) -> anyhow::Result<()> {
    match action {
        RegistrarAction::Add {
            client_id,
            password,
            state,
            iana_id,
            tlds,
        } => {
            let registrar = create_registrar(
                db,
                &NewRegistrar {
                    client_id: &client_id,
                    password: &password,
                    state,
                    iana_id,
                    allowed_tlds: tlds.into_iter().collect(),
                },
                now,
            )
            .await?;
            info!(client_id = %registrar.client_id, state = %registrar.state, "Registrar created");
        }
        RegistrarAction::State { client_id, state } => {
            if !db.set_registrar_state(&client_id, state, now).await? {
                anyhow::bail!("Unknown registrar: {client_id}");
            }
            info!(client_id = %client_id, state = %state, "Registrar state changed");
        }
        RegistrarAction::Tlds { client_id, tlds } => {
            let tlds: BTreeSet<String> = tlds.into_iter().collect();
            if !db.set_registrar_tlds(&client_id, &tlds, now).await? {
                anyhow::bail!("Unknown registrar: {client_id}");
            }
            info!(client_id = %client_id, tlds = ?tlds, "Registrar TLDs replaced");
        }
        RegistrarAction::List => {
            for registrar in db.list_registrars().await? {
                print_line(&format!(
                    "{}\t{}\t{}",
                    registrar.client_id,
                    registrar.state,
                    registrar
                        .allowed_tlds
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(",")
                ));
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    print_line(&serde_json::to_string(value)?);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".registry").join("registry.db"))
}
