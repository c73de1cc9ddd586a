//! Host flows.
//!
//! A host whose name falls under a served TLD is subordinate to the
//! second-level domain above it: that domain must exist, the host must carry
//! addresses, and the domain's sponsor manages it. Any other host is external
//! and carries no addresses.

use std::collections::BTreeSet;
use std::net::IpAddr;

use registry_core::Config;
use tracing::{info, instrument};

use super::FlowOutcome;
use super::command::{Attributes, HostUpdate, Verb};
use super::context::{
    FlowContext, apply_status_changes, load_existing, validate_fqdn, verify_no_status,
};
use super::dispatcher::FlowResponse;
use crate::error::{FlowError, FlowResult};
use crate::model::{
    EppResource, HistoryType, HostData, ResourceDetails, ResourceKind, StatusValue, new_repo_id,
};
use crate::storage::{Changeset, StoreTxn};

const KIND: ResourceKind = ResourceKind::Host;

pub(crate) async fn run(
    verb: Verb,
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    match verb {
        Verb::Create => create(ctx, txn, now).await,
        Verb::Update => update(ctx, txn, now).await,
        Verb::Delete => delete(ctx, txn, now).await,
        Verb::Info => info_flow(ctx, txn, now).await,
        _ => Err(ctx.malformed()),
    }
}

/// Name of the in-registry domain `host_name` would be subordinate to.
fn superordinate_name(config: &Config, host_name: &str) -> Option<String> {
    let tld = config.matching_tld(host_name)?;
    let prefix = &host_name[..host_name.len() - tld.len() - 1];
    let label = prefix.rsplit('.').next()?;
    Some(format!("{label}.{tld}"))
}

/// The active superordinate domain for `host_name`, if the name is
/// in-registry. The acting registrar must sponsor it.
async fn superordinate_for(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    host_name: &str,
    now: i64,
) -> FlowResult<Option<EppResource>> {
    let Some(domain_name) = superordinate_name(ctx.config, host_name) else {
        return Ok(None);
    };
    let domain = txn
        .find_active(ResourceKind::Domain, &domain_name, now)
        .await?
        .ok_or(FlowError::SuperordinateDomainNotFound(domain_name))?;
    if !ctx.superuser && domain.current_sponsor_client_id != ctx.client_id {
        return Err(FlowError::NotAuthorized(format!(
            "{} is not sponsored by {}",
            domain.unique_id(),
            ctx.client_id
        )));
    }
    verify_no_status(&domain, &[StatusValue::PendingDelete])?;
    Ok(Some(domain))
}

fn verify_addresses(subordinate: bool, addresses: &BTreeSet<IpAddr>, name: &str) -> FlowResult<()> {
    match (subordinate, addresses.is_empty()) {
        (true, true) => Err(FlowError::HostAddressMismatch(format!(
            "subordinate host {name} needs at least one address"
        ))),
        (false, false) => Err(FlowError::HostAddressMismatch(format!(
            "external host {name} may not have addresses"
        ))),
        _ => Ok(()),
    }
}

/// Subordinate hosts are managed by whoever sponsors their domain.
async fn verify_host_sponsor(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    host: &EppResource,
    now: i64,
) -> FlowResult<()> {
    match host.host().and_then(|h| h.superordinate_domain.as_deref()) {
        Some(domain_repo_id) => {
            let domain = txn.load_settled(domain_repo_id, now).await?;
            ctx.verify_sponsor(&domain)
        }
        None => ctx.verify_sponsor(host),
    }
}

fn host_data(resource: &mut EppResource) -> FlowResult<&mut HostData> {
    resource
        .host_mut()
        .ok_or_else(|| FlowError::Internal("host row without host data".to_string()))
}

fn subordinates(domain: &mut EppResource) -> FlowResult<&mut BTreeSet<String>> {
    domain
        .domain_mut()
        .map(|d| &mut d.subordinate_hosts)
        .ok_or_else(|| FlowError::Internal("superordinate is not a domain".to_string()))
}

#[instrument(skip_all, fields(flow = "HostCreate", host = %ctx.command.target_id))]
async fn create(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::HostCreate(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let name = ctx.command.target_id.as_str();
    validate_fqdn(name)?;
    if txn.find_active(KIND, name, now).await?.is_some() {
        return Err(FlowError::AlreadyExists {
            kind: KIND,
            id: name.to_string(),
        });
    }
    let superordinate = superordinate_for(ctx, txn, name, now).await?;
    verify_addresses(superordinate.is_some(), &attrs.inet_addresses, name)?;

    let host = EppResource::new(
        new_repo_id("ROID"),
        ctx.client_id,
        now,
        ResourceDetails::Host(HostData {
            fully_qualified_host_name: name.to_string(),
            inet_addresses: attrs.inet_addresses.clone(),
            superordinate_domain: superordinate.as_ref().map(|d| d.repo_id.clone()),
        }),
    );
    let response = FlowResponse::Created {
        repo_id: host.repo_id.clone(),
        expiration_time: None,
    };

    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::HostCreate, now, &host));
    changes.resources.push(host);

    let outcome = match superordinate {
        Some(mut domain) => {
            subordinates(&mut domain)?.insert(name.to_string());
            domain.touch(ctx.client_id, now);
            changes.resources.push(domain);
            FlowOutcome::with_changes(response, changes).notify_dns(name, KIND)
        }
        None => FlowOutcome::with_changes(response, changes),
    };
    info!("Host created");
    Ok(outcome)
}

#[instrument(skip_all, fields(flow = "HostUpdate", host = %ctx.command.target_id))]
async fn update(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::HostUpdate(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let HostUpdate {
        add_addresses,
        remove_addresses,
        add_statuses,
        remove_statuses,
        new_name,
    } = attrs;

    let old_name = ctx.command.target_id.as_str();
    let mut host = load_existing(txn, KIND, old_name, now).await?;
    verify_host_sponsor(ctx, txn, &host, now).await?;
    ctx.verify_updatable(&host, remove_statuses)?;
    ctx.verify_status_changes(add_statuses, remove_statuses)?;

    let renamed_to = new_name.as_deref().filter(|n| *n != old_name);
    let old_superordinate = host.host().and_then(|h| h.superordinate_domain.clone());

    let new_superordinate = match renamed_to {
        Some(name) => {
            validate_fqdn(name)?;
            if txn.find_active(KIND, name, now).await?.is_some() {
                return Err(FlowError::AlreadyExists {
                    kind: KIND,
                    id: name.to_string(),
                });
            }
            superordinate_for(ctx, txn, name, now).await?
        }
        None => None,
    };
    let subordinate_after = match renamed_to {
        Some(_) => new_superordinate.is_some(),
        None => old_superordinate.is_some(),
    };

    let data = host_data(&mut host)?;
    let addresses_before = data.inet_addresses.clone();
    for address in remove_addresses {
        data.inet_addresses.remove(address);
    }
    data.inet_addresses.extend(add_addresses.iter().copied());
    let final_name = renamed_to.unwrap_or(old_name).to_string();
    verify_addresses(subordinate_after, &data.inet_addresses, &final_name)?;
    let addresses_changed = addresses_before != data.inet_addresses;

    let mut changes = Changeset::default();
    if let Some(name) = renamed_to {
        data.fully_qualified_host_name = name.to_string();
        data.superordinate_domain = new_superordinate.as_ref().map(|d| d.repo_id.clone());

        let mut domains: Vec<EppResource> = Vec::new();
        if let Some(repo_id) = &old_superordinate {
            let mut old_domain = txn.load_settled(repo_id, now).await?;
            subordinates(&mut old_domain)?.remove(old_name);
            domains.push(old_domain);
        }
        if let Some(mut new_domain) = new_superordinate {
            match domains.iter_mut().find(|d| d.repo_id == new_domain.repo_id) {
                Some(same) => {
                    subordinates(same)?.insert(name.to_string());
                }
                None => {
                    subordinates(&mut new_domain)?.insert(name.to_string());
                    domains.push(new_domain);
                }
            }
        }
        for domain in &mut domains {
            domain.touch(ctx.client_id, now);
        }
        changes.resources.extend(domains);
        info!(new_name = name, "Host renamed");
    }

    apply_status_changes(&mut host, add_statuses, remove_statuses);
    host.touch(ctx.client_id, now);
    changes
        .history
        .push(ctx.new_history(HistoryType::HostUpdate, now, &host));
    changes.resources.push(host);

    let mut outcome = FlowOutcome::with_changes(FlowResponse::Success, changes);
    if renamed_to.is_some() || addresses_changed {
        if old_superordinate.is_some() {
            outcome = outcome.notify_dns(old_name, KIND);
        }
        if renamed_to.is_some() && subordinate_after {
            outcome = outcome.notify_dns(&final_name, KIND);
        }
    }
    Ok(outcome)
}

#[instrument(skip_all, fields(flow = "HostDelete", host = %ctx.command.target_id))]
async fn delete(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let name = ctx.command.target_id.as_str();
    let mut host = load_existing(txn, KIND, name, now).await?;
    verify_host_sponsor(ctx, txn, &host, now).await?;
    verify_no_status(&host, &[StatusValue::PendingDelete])?;
    if !ctx.superuser {
        verify_no_status(
            &host,
            &[
                StatusValue::ClientDeleteProhibited,
                StatusValue::ServerDeleteProhibited,
            ],
        )?;
    }
    if txn.is_linked(&host.repo_id, now).await? {
        return Err(FlowError::ResourceInUse(format!(
            "{name} is a nameserver of an existing domain"
        )));
    }

    let superordinate = host.host().and_then(|h| h.superordinate_domain.clone());
    host.deletion_time = now;
    host.touch(ctx.client_id, now);

    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::HostDelete, now, &host));
    changes.resources.push(host);

    let outcome = match superordinate {
        Some(repo_id) => {
            let mut domain = txn.load_settled(&repo_id, now).await?;
            subordinates(&mut domain)?.remove(name);
            domain.touch(ctx.client_id, now);
            changes.resources.push(domain);
            FlowOutcome::with_changes(FlowResponse::Deleted { pending: false }, changes)
                .notify_dns(name, KIND)
        }
        None => FlowOutcome::with_changes(FlowResponse::Deleted { pending: false }, changes),
    };
    info!("Host deleted");
    Ok(outcome)
}

async fn info_flow(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let host = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    Ok(FlowOutcome::respond(FlowResponse::Resource(Box::new(host))))
}
