//! Contact flows.

use tracing::{info, instrument};

use super::FlowOutcome;
use super::command::{Attributes, ContactCreate, ContactUpdate, Verb};
use super::context::{FlowContext, apply_status_changes, load_existing, verify_no_status};
use super::dispatcher::FlowResponse;
use crate::error::{FlowError, FlowResult};
use crate::model::{
    ContactData, EppResource, HistoryType, ResourceDetails, ResourceKind, StatusValue,
    TransferStatus, new_id, new_repo_id,
};
use crate::storage::{Changeset, StoreTxn};
use crate::transfer::{self, ApprovalPlan, TransferAction, TransferRequest};

const KIND: ResourceKind = ResourceKind::Contact;

/// EPP contact identifiers are 3 to 16 characters.
const CONTACT_ID_LEN: std::ops::RangeInclusive<usize> = 3..=16;

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
        Verb::TransferRequest => transfer_request(ctx, txn, now).await,
        Verb::TransferApprove => transfer_approve(ctx, txn, now).await,
        Verb::TransferReject => transfer_close(ctx, txn, now, TransferAction::Reject).await,
        Verb::TransferCancel => transfer_close(ctx, txn, now, TransferAction::Cancel).await,
        Verb::TransferQuery => {
            let resource = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
            transfer::check_query(&resource.transfer_data, ctx.client_id, ctx.superuser)?;
            Ok(FlowOutcome::respond(FlowResponse::Transfer(
                resource.transfer_data,
            )))
        }
        _ => Err(ctx.malformed()),
    }
}

fn contact_data(resource: &mut EppResource) -> FlowResult<&mut ContactData> {
    resource
        .contact_mut()
        .ok_or_else(|| FlowError::Internal("contact row without contact data".to_string()))
}

#[instrument(skip_all, fields(flow = "ContactCreate", contact = %ctx.command.target_id))]
async fn create(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::ContactCreate(ContactCreate {
        name,
        email,
        voice,
        auth_info,
    }) = &ctx.command.attributes
    else {
        return Err(ctx.malformed());
    };
    let contact_id = ctx.command.target_id.as_str();
    if !CONTACT_ID_LEN.contains(&contact_id.chars().count()) {
        return Err(FlowError::MalformedCommand(format!(
            "contact id {contact_id:?} must be 3 to 16 characters"
        )));
    }
    if txn.find_active(KIND, contact_id, now).await?.is_some() {
        return Err(FlowError::AlreadyExists {
            kind: KIND,
            id: contact_id.to_string(),
        });
    }

    let contact = EppResource::new(
        new_repo_id("ROID"),
        ctx.client_id,
        now,
        ResourceDetails::Contact(ContactData {
            contact_id: contact_id.to_string(),
            name: name.clone(),
            email: email.clone(),
            voice: voice.clone(),
            auth_info: auth_info.clone(),
        }),
    );
    let response = FlowResponse::Created {
        repo_id: contact.repo_id.clone(),
        expiration_time: None,
    };
    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::ContactCreate, now, &contact));
    changes.resources.push(contact);
    info!("Contact created");
    Ok(FlowOutcome::with_changes(response, changes))
}

#[instrument(skip_all, fields(flow = "ContactUpdate", contact = %ctx.command.target_id))]
async fn update(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let Attributes::ContactUpdate(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let ContactUpdate {
        name,
        email,
        voice,
        auth_info,
        add_statuses,
        remove_statuses,
    } = attrs;

    let mut contact = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    ctx.verify_sponsor(&contact)?;
    ctx.verify_updatable(&contact, remove_statuses)?;
    ctx.verify_status_changes(add_statuses, remove_statuses)?;

    let data = contact_data(&mut contact)?;
    if let Some(name) = name {
        data.name.clone_from(name);
    }
    if let Some(email) = email {
        data.email.clone_from(email);
    }
    if voice.is_some() {
        data.voice.clone_from(voice);
    }
    if let Some(auth_info) = auth_info {
        data.auth_info.clone_from(auth_info);
    }
    apply_status_changes(&mut contact, add_statuses, remove_statuses);
    contact.touch(ctx.client_id, now);

    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::ContactUpdate, now, &contact));
    changes.resources.push(contact);
    Ok(FlowOutcome::with_changes(FlowResponse::Success, changes))
}

#[instrument(skip_all, fields(flow = "ContactDelete", contact = %ctx.command.target_id))]
async fn delete(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let contact_id = ctx.command.target_id.as_str();
    let mut contact = load_existing(txn, KIND, contact_id, now).await?;
    ctx.verify_sponsor(&contact)?;
    verify_no_status(&contact, &[StatusValue::PendingDelete])?;
    if !ctx.superuser {
        verify_no_status(
            &contact,
            &[
                StatusValue::ClientDeleteProhibited,
                StatusValue::ServerDeleteProhibited,
            ],
        )?;
    }
    if txn.is_linked(&contact.repo_id, now).await? {
        return Err(FlowError::ResourceInUse(format!(
            "{contact_id} is referenced by an existing domain"
        )));
    }

    if contact.transfer_data.is_pending() {
        contact.transfer_data.status = TransferStatus::ServerCancelled;
        contact.transfer_data.server_approve = None;
        contact.transfer_data.pending_expiration_time = Some(now);
        contact.status_values.remove(&StatusValue::PendingTransfer);
    }
    contact.deletion_time = now;
    contact.touch(ctx.client_id, now);

    let mut changes = Changeset::default();
    changes
        .history
        .push(ctx.new_history(HistoryType::ContactDelete, now, &contact));
    changes.resources.push(contact);
    info!("Contact deleted");
    Ok(FlowOutcome::with_changes(
        FlowResponse::Deleted { pending: false },
        changes,
    ))
}

async fn info_flow(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let contact = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    let visible = if ctx.superuser || contact.current_sponsor_client_id == ctx.client_id {
        contact
    } else {
        contact.redacted()
    };
    Ok(FlowOutcome::respond(FlowResponse::Resource(Box::new(
        visible,
    ))))
}

#[instrument(skip_all, fields(flow = "ContactTransferRequest", contact = %ctx.command.target_id))]
async fn transfer_request(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    let Attributes::TransferRequest(attrs) = &ctx.command.attributes else {
        return Err(ctx.malformed());
    };
    let mut contact = load_existing(txn, KIND, &ctx.command.target_id, now).await?;

    let history_id = new_id();
    let mut changes = Changeset::default();
    // Contacts have no registration period to extend.
    transfer::request_transfer(
        &mut contact,
        &TransferRequest {
            gaining_client_id: ctx.client_id,
            auth_info: &attrs.auth_info,
            period_years: 1,
            now,
            history_id: &history_id,
            superuser: ctx.superuser,
        },
        ctx.config.contacts.automatic_transfer_secs,
        None,
        &mut changes,
    )?;

    changes.history.push(ctx.history(
        history_id,
        HistoryType::ContactTransferRequest,
        now,
        &contact,
    ));
    let data = contact.transfer_data.clone();
    changes.resources.push(contact);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}

#[instrument(skip_all, fields(flow = "ContactTransferApprove", contact = %ctx.command.target_id))]
async fn transfer_approve(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    let mut contact = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    transfer::check_actor(
        &contact.transfer_data,
        ctx.client_id,
        ctx.superuser,
        TransferAction::Approve,
    )?;

    let history_id = new_id();
    let gaining = contact
        .transfer_data
        .gaining_client_id
        .clone()
        .unwrap_or_default();
    let losing = contact.current_sponsor_client_id.clone();
    let effects = transfer::plan_approval(
        &ApprovalPlan {
            resource: &contact,
            gaining_client_id: &gaining,
            losing_client_id: &losing,
            approve_time: now,
            period_years: 1,
            status: TransferStatus::ClientApproved,
            history_id: &history_id,
        },
        None,
    )?;
    let mut changes = Changeset::default();
    transfer::complete_transfer(
        &mut contact,
        effects,
        TransferStatus::ClientApproved,
        ctx.client_id,
        now,
        &mut changes,
    );

    changes.history.push(ctx.history(
        history_id,
        HistoryType::ContactTransferApprove,
        now,
        &contact,
    ));
    let data = contact.transfer_data.clone();
    changes.resources.push(contact);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}

#[instrument(skip_all, fields(flow = "ContactTransferClose", contact = %ctx.command.target_id, action = ?action))]
async fn transfer_close(
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
    action: TransferAction,
) -> FlowResult<FlowOutcome> {
    let mut contact = load_existing(txn, KIND, &ctx.command.target_id, now).await?;
    transfer::check_actor(&contact.transfer_data, ctx.client_id, ctx.superuser, action)?;

    let history_id = new_id();
    let mut changes = Changeset::default();
    transfer::close_transfer(
        &mut contact,
        action,
        ctx.client_id,
        now,
        &history_id,
        &mut changes,
    );
    let history_type = match action {
        TransferAction::Cancel => HistoryType::ContactTransferCancel,
        TransferAction::Reject | TransferAction::Approve => HistoryType::ContactTransferReject,
    };
    changes
        .history
        .push(ctx.history(history_id, history_type, now, &contact));
    let data = contact.transfer_data.clone();
    changes.resources.push(contact);
    Ok(FlowOutcome::with_changes(
        FlowResponse::Transfer(data),
        changes,
    ))
}
