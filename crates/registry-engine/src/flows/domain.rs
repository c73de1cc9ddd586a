//! Domain flows: create, update, delete, renew, info and transfers.

use std::collections::BTreeSet;

use chrono::DateTime;
use registry_core::TldPolicy;
use registry_core::clock::plus_years;
use tracing::{info, instrument};

use super::FlowOutcome;
use super::command::{Attributes, ContactRef, DomainCreate, DomainRenew, DomainUpdate, Verb};
use super::context::{
    FlowContext, apply_status_changes, load_existing, resolve_link, validate_fqdn,
    verify_no_status,
};
use super::dispatcher::FlowResponse;
use crate::billing::{self, BillableAction};
use crate::error::{FlowError, FlowResult};
use crate::model::{
    BillingReason, DesignatedContact, DomainData, EppResource, GracePeriodType, HistoryType,
    ResourceDetails, ResourceKind, StatusValue, TransferStatus, new_id, new_repo_id,
};
use crate::storage::{Changeset, StoreTxn};
use crate::transfer::{self, ApprovalPlan, MAX_REGISTRATION_YEARS, TransferAction, TransferRequest};

const KIND: ResourceKind = ResourceKind::Domain;

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
        Verb::Renew => renew(ctx, txn, now).await,
        Verb::Info => info_flow(ctx, txn, now).await,
        Verb::TransferRequest => transfer_request(ctx, txn, now).await,
        Verb::TransferApprove => transfer_approve(ctx, txn, now).await,
        Verb::TransferReject => transfer_close(ctx, txn, now, TransferAction::Reject).await,
        Verb::TransferCancel => transfer_close(ctx, txn, now, TransferAction::Cancel).await,
        Verb::TransferQuery => transfer_query(ctx, txn, now).await,
        Verb::PollRequest | Verb::PollAck | Verb::Logout => Err(ctx.malformed()),
    }
}

/// TLD of a second-level name under a served TLD.
fn split_domain_name(ctx: &FlowContext<'_>, name: &str) -> FlowResult<String> {
    validate_fqdn(name)?;
    let tld = ctx
        .config
        .matching_tld(name)
        .ok_or_else(|| FlowError::TldNotAllowed(name.rsplit('.').next().unwrap_or(name).to_string()))?;
    let label = &name[..name.len() - tld.len() - 1];
    if label.contains('.') {
        return Err(FlowError::MalformedCommand(format!(
            "{name} is not a second-level name under {tld}"
        )));
    }
    Ok(tld.to_string())
}

/// Load an existing domain and check the acting registrar's TLD access.
async fn load_domain<'c>(
    ctx: &'c FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<(EppResource, &'c TldPolicy)> {
    let resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    let tld = resource
        .domain()
        .map(|d| d.tld.clone())
        .ok_or_else(|| FlowError::Internal("domain row without domain data".to_string()))?;
    let policy = ctx.verify_tld_access(txn, &tld).await?;
    Ok((resource, policy))
}

fn domain_data(resource: &mut EppResource) -> FlowResult<&mut DomainData> {
    resource
        .domain_mut()
        .ok_or_else(|| FlowError::Internal("domain row without domain data".to_string()))
}

fn verify_period(years: u32) -> FlowResult<()> {
    if (1..=MAX_REGISTRATION_YEARS).contains(&years) {
        Ok(())
    } else {
        Err(FlowError::ExceedsMaxRegistrationYears)
    }
}

async fn resolve_contacts(
    txn: &mut StoreTxn,
    refs: &[ContactRef],
    now: i64,
) -> FlowResult<BTreeSet<DesignatedContact>> {
    let mut contacts = BTreeSet::new();
    for r in refs {
        let repo_id = resolve_link(txn, ResourceKind::Contact, &r.contact_id, now).await?;
        contacts.insert(DesignatedContact {
            contact_type: r.contact_type,
            contact: repo_id,
        });
    }
    Ok(contacts)
}

async fn resolve_hosts(
    txn: &mut StoreTxn,
    names: &BTreeSet<String>,
    now: i64,
) -> FlowResult<BTreeSet<String>> {
    let mut repo_ids = BTreeSet::new();
    for name in names {
        repo_ids.insert(resolve_link(txn, ResourceKind::Host, name, now).await?);
    }
    Ok(repo_ids)
}

#[instrument(skip_all, fields(flow = "DomainCreate", domain = %ctx.command.target_id))]
async fn create(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::DomainCreate(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let DomainCreate {
        period_years,
        registrant,
        contacts,
        nameservers,
        ds_data,
        auth_info,
    } = attrs;
    let name = ctx.command.target_id.as_str();
    let tld = split_domain_name(ctx, name)?;
    let policy = ctx.verify_tld_access(txn, &tld).await?;
    verify_period(*period_years)?;

    if txn.find_active(KIND, name, now).await?.is_some() {
        return Err(FlowError::AlreadyExists {
            kind: KIND,
            id: name.to_string(),
        });
    }

    let registrant = match registrant {
        Some(contact_id) => {
            Some(resolve_link(txn, ResourceKind::Contact, contact_id, now).await?)
        }
        None => None,
    };
    let contacts = resolve_contacts(txn, contacts, now).await?;
    let hosts = resolve_hosts(txn, nameservers, now).await?;
    let expiration = plus_years(now, *period_years)?;

    let mut resource = EppResource::new(
        new_repo_id(&tld),
        ctx.client_id,
        now,
        ResourceDetails::Domain(DomainData {
            fully_qualified_domain_name: name.to_string(),
            tld,
            registrant,
            contacts,
            nameservers: hosts,
            subordinate_hosts: BTreeSet::new(),
            ds_data: ds_data.clone(),
            auth_info: auth_info.clone(),
            registration_expiration_time: expiration,
            grace_periods: Vec::new(),
            autorenew_billing_event: None,
            autorenew_poll_message: None,
        }),
    );

    let history_id = new_id();
    let mut changes = Changeset::default();
    let create_event = billing::record_billable_action(
        &BillableAction {
            reason: BillingReason::Create,
            resource: &resource,
            client_id: ctx.client_id,
            period_years: *period_years,
            event_time: now,
            history_id: &history_id,
        },
        policy,
    );
    billing::open_grace_period(
        domain_data(&mut resource)?,
        GracePeriodType::Add,
        policy,
        now,
        ctx.client_id,
        Some(create_event.id.clone()),
    );
    changes.billing_events.push(create_event);
    billing::install_autorenew(
        &mut resource,
        ctx.client_id,
        expiration,
        &history_id,
        policy,
        &mut changes,
    );

    let mut entry = ctx.history(history_id, HistoryType::DomainCreate, now, &resource);
    entry.period_years = Some(*period_years);
    changes.history.push(entry);

    info!(repo_id = %resource.repo_id, years = period_years, "Domain created");
    let response = FlowResponse::Created {
        repo_id: resource.repo_id.clone(),
        expiration_time: Some(expiration),
    };
    let publishes = !nameservers.is_empty();
    changes.resources.push(resource);
    let outcome = FlowOutcome::with_changes(response, changes);
    Ok(if publishes {
        outcome.notify_dns(name, KIND)
    } else {
        outcome
    })
}

#[instrument(skip_all, fields(flow = "DomainUpdate", domain = %ctx.command.target_id))]
async fn update(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::DomainUpdate(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let (mut resource, _policy) = load_domain(ctx, txn, now).await?;
    ctx.verify_sponsor(&resource)?;
    ctx.verify_updatable(&resource, &attrs.remove_statuses)?;
    ctx.verify_status_changes(&attrs.add_statuses, &attrs.remove_statuses)?;

    let DomainUpdate {
        add_nameservers,
        remove_nameservers,
        add_contacts,
        remove_contacts,
        add_statuses,
        remove_statuses,
        add_ds_data,
        remove_ds_data,
        registrant,
        auth_info,
    } = attrs;

    let added_hosts = resolve_hosts(txn, add_nameservers, now).await?;
    let mut removed_hosts = BTreeSet::new();
    for name in remove_nameservers {
        if let Some(host) = txn.find_active(ResourceKind::Host, name, now).await? {
            removed_hosts.insert(host.repo_id);
        }
    }
    let added_contacts = resolve_contacts(txn, add_contacts, now).await?;
    let mut removed_contacts = BTreeSet::new();
    for r in remove_contacts {
        if let Some(contact) = txn.find_active(ResourceKind::Contact, &r.contact_id, now).await? {
            removed_contacts.insert(DesignatedContact {
                contact_type: r.contact_type,
                contact: contact.repo_id,
            });
        }
    }
    let registrant = match registrant {
        Some(contact_id) => {
            Some(resolve_link(txn, ResourceKind::Contact, contact_id, now).await?)
        }
        None => None,
    };

    let hold_before = resource.status_values.iter().any(|s| s.affects_dns());
    apply_status_changes(&mut resource, add_statuses, remove_statuses);
    let hold_after = resource.status_values.iter().any(|s| s.affects_dns());

    let domain = domain_data(&mut resource)?;
    let delegation_before = (domain.nameservers.clone(), domain.ds_data.clone());
    for repo_id in &removed_hosts {
        domain.nameservers.remove(repo_id);
    }
    domain.nameservers.extend(added_hosts);
    for contact in &removed_contacts {
        domain.contacts.remove(contact);
    }
    domain.contacts.extend(added_contacts);
    for ds in remove_ds_data {
        domain.ds_data.remove(ds);
    }
    domain.ds_data.extend(add_ds_data.iter().cloned());
    if registrant.is_some() {
        domain.registrant = registrant;
    }
    if let Some(auth_info) = auth_info {
        domain.auth_info.clone_from(auth_info);
    }
    let delegation_changed =
        delegation_before != (domain.nameservers.clone(), domain.ds_data.clone());

    resource.touch(ctx.client_id, now);
    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::DomainUpdate, now, &resource));
    changes.resources.push(resource);

    let outcome = FlowOutcome::with_changes(FlowResponse::Success, changes);
    Ok(if delegation_changed || hold_before != hold_after {
        outcome.notify_dns(&ctx.command.target_id, KIND)
    } else {
        outcome
    })
}

#[instrument(skip_all, fields(flow = "DomainDelete", domain = %ctx.command.target_id))]
async fn delete(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let (mut resource, policy) = load_domain(ctx, txn, now).await?;
    ctx.verify_sponsor(&resource)?;
    verify_no_status(&resource, &[StatusValue::PendingDelete])?;
    if !ctx.superuser {
        verify_no_status(
            &resource,
            &[
                StatusValue::ClientDeleteProhibited,
                StatusValue::ServerDeleteProhibited,
            ],
        )?;
    }
    if let Some(host) = resource
        .domain()
        .and_then(|d| d.subordinate_hosts.iter().next())
    {
        return Err(FlowError::ResourceInUse(format!(
            "subordinate host {host} still exists"
        )));
    }

    let history_id = new_id();
    let mut changes = Changeset::default();

    if resource.transfer_data.is_pending() {
        resource.transfer_data.status = TransferStatus::ServerCancelled;
        resource.transfer_data.server_approve = None;
        resource.transfer_data.pending_expiration_time = Some(now);
        resource.status_values.remove(&StatusValue::PendingTransfer);
    }

    let open: Vec<GracePeriodType> = resource
        .domain()
        .map(|d| {
            d.active_grace_periods(now)
                .map(|g| g.grace_type)
                .filter(|t| *t != GracePeriodType::Redemption)
                .collect()
        })
        .unwrap_or_default();

    for grace_type in &open {
        billing::reverse_if_within_grace(
            txn,
            &mut resource,
            *grace_type,
            now,
            &history_id,
            &mut changes,
        )
        .await?;
    }

    let domain = domain_data(&mut resource)?;
    billing::end_autorenew(domain, now, &mut changes);
    domain.grace_periods.clear();

    let pending = open.is_empty();
    if pending {
        billing::open_grace_period(
            domain,
            GracePeriodType::Redemption,
            policy,
            now,
            ctx.client_id,
            None,
        );
        resource.status_values.insert(StatusValue::PendingDelete);
        resource.deletion_time =
            now + policy.redemption_grace_period_secs + policy.pending_delete_secs;
    } else {
        resource.deletion_time = now;
    }
    resource.touch(ctx.client_id, now);

    info!(
        repo_id = %resource.repo_id,
        pending,
        reversed = open.len(),
        "Domain deleted"
    );
    changes
        .history
        .push(ctx.history(history_id, HistoryType::DomainDelete, now, &resource));
    changes.resources.push(resource);
    Ok(
        FlowOutcome::with_changes(FlowResponse::Deleted { pending }, changes)
            .notify_dns(&ctx.command.target_id, KIND),
    )
}

/// UTC calendar date of a timestamp.
fn expiration_date(time: i64) -> Option<chrono::NaiveDate> {
    DateTime::from_timestamp(time, 0).map(|t| t.date_naive())
}

#[instrument(skip_all, fields(flow = "DomainRenew", domain = %ctx.command.target_id))]
async fn renew(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::DomainRenew(DomainRenew {
        current_expiration_date,
        period_years,
    }) = &ctx.command.attributes
    else {
        return Err(ctx.malformed());
    };
    let (mut resource, policy) = load_domain(ctx, txn, now).await?;
    ctx.verify_sponsor(&resource)?;
    verify_no_status(
        &resource,
        &[StatusValue::PendingDelete, StatusValue::PendingTransfer],
    )?;
    if !ctx.superuser {
        verify_no_status(
            &resource,
            &[
                StatusValue::ClientRenewProhibited,
                StatusValue::ServerRenewProhibited,
            ],
        )?;
    }
    verify_period(*period_years)?;

    let old_expiration = domain_data(&mut resource)?.registration_expiration_time;
    if expiration_date(old_expiration) != Some(*current_expiration_date) {
        return Err(FlowError::IncorrectCurrentExpirationDate);
    }
    let new_expiration = plus_years(old_expiration, *period_years)?;
    if new_expiration > plus_years(now, MAX_REGISTRATION_YEARS)? {
        return Err(FlowError::ExceedsMaxRegistrationYears);
    }

    let history_id = new_id();
    let mut changes = Changeset::default();
    let renew_event = billing::record_billable_action(
        &BillableAction {
            reason: BillingReason::Renew,
            resource: &resource,
            client_id: ctx.client_id,
            period_years: *period_years,
            event_time: now,
            history_id: &history_id,
        },
        policy,
    );

    let sponsor = resource.current_sponsor_client_id.clone();
    let domain = domain_data(&mut resource)?;
    domain.registration_expiration_time = new_expiration;
    billing::open_grace_period(
        domain,
        GracePeriodType::Renew,
        policy,
        now,
        ctx.client_id,
        Some(renew_event.id.clone()),
    );
    billing::end_autorenew(domain, now, &mut changes);
    changes.billing_events.push(renew_event);
    billing::install_autorenew(
        &mut resource,
        &sponsor,
        new_expiration,
        &history_id,
        policy,
        &mut changes,
    );
    resource.touch(ctx.client_id, now);

    let mut entry = ctx.history(history_id, HistoryType::DomainRenew, now, &resource);
    entry.period_years = Some(*period_years);
    changes.history.push(entry);
    changes.resources.push(resource);

    Ok(FlowOutcome::with_changes(
        FlowResponse::Renewed {
            expiration_time: new_expiration,
        },
        changes,
    ))
}

async fn info_flow(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    let visible = if ctx.superuser || resource.current_sponsor_client_id == ctx.client_id {
        resource
    } else {
        resource.redacted()
    };
    Ok(FlowOutcome::respond(FlowResponse::Resource(Box::new(
        visible,
    ))))
}

#[instrument(skip_all, fields(flow = "DomainTransferRequest", domain = %ctx.command.target_id))]
async fn transfer_request(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    let Attributes::TransferRequest(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let (mut resource, policy) = load_domain(ctx, txn, now).await?;

    let history_id = new_id();
    let mut changes = Changeset::default();
    transfer::request_transfer(
        &mut resource,
        &TransferRequest {
            gaining_client_id: ctx.client_id,
            auth_info: &attrs.auth_info,
            period_years: attrs.period_years,
            now,
            history_id: &history_id,
            superuser: ctx.superuser,
        },
        policy.automatic_transfer_secs,
        Some(policy),
        &mut changes,
    )?;

    let mut entry = ctx.history(history_id, HistoryType::DomainTransferRequest, now, &resource);
    entry.period_years = Some(attrs.period_years);
    changes.history.push(entry);
    let data = resource.transfer_data.clone();
    changes.resources.push(resource);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}

#[instrument(skip_all, fields(flow = "DomainTransferApprove", domain = %ctx.command.target_id))]
async fn transfer_approve(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    let mut resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    transfer::check_actor(
        &resource.transfer_data,
        ctx.client_id,
        ctx.superuser,
        TransferAction::Approve,
    )?;
    let tld = domain_data(&mut resource)?.tld.clone();
    let policy = ctx.config.tld(&tld);

    let history_id = new_id();
    let gaining = resource
        .transfer_data
        .gaining_client_id
        .clone()
        .unwrap_or_default();
    let losing = resource.current_sponsor_client_id.clone();
    let effects = transfer::plan_approval(
        &ApprovalPlan {
            resource: &resource,
            gaining_client_id: &gaining,
            losing_client_id: &losing,
            approve_time: now,
            period_years: resource.transfer_data.extended_registration_years,
            status: TransferStatus::ClientApproved,
            history_id: &history_id,
        },
        policy,
    )?;
    let mut changes = Changeset::default();
    transfer::complete_transfer(
        &mut resource,
        effects,
        TransferStatus::ClientApproved,
        ctx.client_id,
        now,
        &mut changes,
    );

    let mut entry = ctx.history(history_id, HistoryType::DomainTransferApprove, now, &resource);
    entry.period_years = Some(resource.transfer_data.extended_registration_years);
    changes.history.push(entry);
    let data = resource.transfer_data.clone();
    changes.resources.push(resource);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}

#[instrument(skip_all, fields(flow = "DomainTransferClose", domain = %ctx.command.target_id, action = ?action))]
async fn transfer_close(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
    action: TransferAction,
) -> FlowResult<FlowOutcome> {
    let mut resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    transfer::check_actor(&resource.transfer_data, ctx.client_id, ctx.superuser, action)?;

    let history_id = new_id();
    let mut changes = Changeset::default();
    transfer::close_transfer(
        &mut resource,
        action,
        ctx.client_id,
        now,
        &history_id,
        &mut changes,
    );
    let history_type = match action {
        TransferAction::Cancel => HistoryType::DomainTransferCancel,
        TransferAction::Reject | TransferAction::Approve => HistoryType::DomainTransferReject,
    };
    changes
        .history
        .push(ctx.history(history_id, history_type, now, &resource));
    let data = resource.transfer_data.clone();
    changes.resources.push(resource);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}

async fn transfer_query(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    let resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    transfer::check_query(&resource.transfer_data, ctx.client_id, ctx.superuser)?;
    Ok(FlowOutcome::respond(FlowResponse::Transfer(
        resource.transfer_data,
    )))
}
