//! Transfer state machine for domains and contacts.
//!
//! A request records both registrars, the automatic-approval deadline and the
//! effects a server approval would have. Those effects stay inside the
//! resource's transfer data until the transfer is resolved: explicit approval
//! recomputes them at the approval time, rejection and cancellation discard
//! them, and [`resolve`] applies them once the deadline has passed.

use registry_core::TldPolicy;
use registry_core::clock::{format_time, plus_years};
use tracing::info;

use crate::billing::{self, BillableAction};
use crate::error::{FlowError, FlowResult};
use crate::model::{
    BillingReason, EppResource, GracePeriod, GracePeriodType, HistoryEntry, HistoryType,
    PollMessage, PollMessageKind, ResourceKind, ServerApproveEffects, StatusValue, TransferData,
    TransferStatus, new_id,
};
use crate::storage::Changeset;

/// Registration years after which no transfer or renewal may push the
/// expiration.
pub const MAX_REGISTRATION_YEARS: u32 = 10;

/// Outcome of evaluating a transfer record at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The record as it stands at the evaluated time.
    pub effective: TransferData,
    /// Effects to apply when the evaluation turned a pending transfer into a
    /// server approval.
    pub effects: Option<ServerApproveEffects>,
}

/// Evaluate `data` at `now`. A pending transfer whose automatic-approval
/// deadline has passed resolves to `ServerApproved` together with its
/// precomputed effects; anything else resolves to itself.
pub fn resolve(data: &TransferData, now: i64) -> Resolution {
    let expired = data.is_pending()
        && data
            .pending_expiration_time
            .is_some_and(|deadline| deadline <= now);
    if !expired {
        return Resolution {
            effective: data.clone(),
            effects: None,
        };
    }

    let mut effective = data.clone();
    effective.status = TransferStatus::ServerApproved;
    let effects = effective.server_approve.take().unwrap_or_default();
    Resolution {
        effective,
        effects: Some(effects),
    }
}

/// Changes that apply `resource`'s expired pending transfer, if any. The
/// settled resource is the changeset's only resource.
pub fn settle_expired(resource: &EppResource, now: i64) -> Option<Changeset> {
    let effects = resolve(&resource.transfer_data, now).effects?;
    let history_type = match resource.kind() {
        ResourceKind::Domain => HistoryType::DomainTransferServerApprove,
        ResourceKind::Contact => HistoryType::ContactTransferServerApprove,
        ResourceKind::Host => return None,
    };
    let at = resource.transfer_data.pending_expiration_time.unwrap_or(now);
    let gaining = resource
        .transfer_data
        .gaining_client_id
        .clone()
        .unwrap_or_default();
    let history_id = if effects.history_id.is_empty() {
        new_id()
    } else {
        effects.history_id.clone()
    };

    let mut settled = resource.clone();
    let mut changes = Changeset::default();
    complete_transfer(
        &mut settled,
        effects,
        TransferStatus::ServerApproved,
        &gaining,
        at,
        &mut changes,
    );

    let mut entry = HistoryEntry::new(history_id, history_type, &gaining, at, settled.clone());
    entry.requested_by_registrar = false;
    entry.period_years = Some(settled.transfer_data.extended_registration_years);
    changes.history.push(entry);
    changes.resources.push(settled);
    Some(changes)
}

/// Expiration after a transfer approved at `approve_time`: the current
/// expiration rolled forward past the approval time (as autorenew would
/// have), then extended by `years`.
pub fn transferred_expiration(
    current_expiration: i64,
    approve_time: i64,
    years: u32,
) -> FlowResult<i64> {
    let mut expiration = current_expiration;
    while expiration < approve_time {
        expiration = plus_years(expiration, 1)?;
    }
    Ok(plus_years(expiration, years)?)
}

/// Inputs for planning what an approval does.
pub struct ApprovalPlan<'a> {
    pub resource: &'a EppResource,
    pub gaining_client_id: &'a str,
    pub losing_client_id: &'a str,
    pub approve_time: i64,
    pub period_years: u32,
    pub status: TransferStatus,
    pub history_id: &'a str,
}

/// Compute the entities an approval at `plan.approve_time` creates.
pub fn plan_approval(
    plan: &ApprovalPlan<'_>,
    policy: Option<&TldPolicy>,
) -> FlowResult<ServerApproveEffects> {
    let verb = if plan.status == TransferStatus::ServerApproved {
        "server approved"
    } else {
        "approved"
    };
    let notice = |client_id: &str| PollMessage {
        id: new_id(),
        kind: PollMessageKind::OneTime,
        client_id: client_id.to_string(),
        repo_id: plan.resource.repo_id.clone(),
        target_id: plan.resource.unique_id().to_string(),
        event_time: plan.approve_time,
        message: format!("Transfer {verb}."),
        autorenew_end_time: None,
        history_id: plan.history_id.to_string(),
    };
    let mut effects = ServerApproveEffects {
        history_id: plan.history_id.to_string(),
        poll_messages: vec![notice(plan.gaining_client_id), notice(plan.losing_client_id)],
        ..ServerApproveEffects::default()
    };

    let (Some(domain), Some(policy)) = (plan.resource.domain(), policy) else {
        return Ok(effects);
    };

    let new_expiration = transferred_expiration(
        domain.registration_expiration_time,
        plan.approve_time,
        plan.period_years,
    )?;
    let event = billing::record_billable_action(
        &BillableAction {
            reason: BillingReason::Transfer,
            resource: plan.resource,
            client_id: plan.gaining_client_id,
            period_years: plan.period_years,
            event_time: plan.approve_time,
            history_id: plan.history_id,
        },
        policy,
    );
    effects.grace_period = Some(GracePeriod {
        grace_type: GracePeriodType::Transfer,
        expiration_time: plan.approve_time
            + billing::grace_period_length(policy, GracePeriodType::Transfer),
        billing_event_id: Some(event.id.clone()),
        recurring_event_time: None,
        client_id: plan.gaining_client_id.to_string(),
    });
    effects.billing_event = Some(event);
    effects.autorenew_event = Some(billing::recurring_autorenew(
        plan.resource,
        plan.gaining_client_id,
        new_expiration,
        plan.history_id,
        policy,
    ));
    effects.autorenew_poll = Some(billing::autorenew_poll(
        plan.resource,
        plan.gaining_client_id,
        new_expiration,
        plan.history_id,
    ));
    effects.new_expiration_time = Some(new_expiration);
    Ok(effects)
}

/// Hand `resource` to the gaining registrar at `at` and stage `effects`.
pub fn complete_transfer(
    resource: &mut EppResource,
    effects: ServerApproveEffects,
    status: TransferStatus,
    actor: &str,
    at: i64,
    changes: &mut Changeset,
) {
    let gaining = resource
        .transfer_data
        .gaining_client_id
        .clone()
        .unwrap_or_default();
    resource.current_sponsor_client_id.clone_from(&gaining);
    resource.last_transfer_time = Some(at);
    resource.status_values.remove(&StatusValue::PendingTransfer);
    resource.last_update_time = resource.last_update_time.max(at);
    resource.last_update_client_id = actor.to_string();
    resource.transfer_data.status = status;
    resource.transfer_data.server_approve = None;
    resource.transfer_data.pending_expiration_time = Some(at);

    if let Some(domain) = resource.domain_mut() {
        domain.grace_periods.clear();
        billing::end_autorenew(domain, at, changes);
        if let Some(expiration) = effects.new_expiration_time {
            domain.registration_expiration_time = expiration;
        }
        if let Some(event) = effects.autorenew_event {
            domain.autorenew_billing_event = Some(event.id.clone());
            changes.billing_events.push(event);
        }
        if let Some(poll) = effects.autorenew_poll {
            domain.autorenew_poll_message = Some(poll.id.clone());
            changes.poll_messages.push(poll);
        }
        if let Some(grace) = effects.grace_period {
            domain.grace_periods.push(grace);
        }
    }
    if let Some(event) = effects.billing_event {
        changes.billing_events.push(event);
    }
    changes.poll_messages.extend(effects.poll_messages);

    info!(
        repo_id = %resource.repo_id,
        new_sponsor = %gaining,
        status = %status,
        at = %format_time(at),
        "Transfer completed"
    );
}

/// A transfer request as submitted by the gaining registrar.
pub struct TransferRequest<'a> {
    pub gaining_client_id: &'a str,
    pub auth_info: &'a str,
    pub period_years: u32,
    pub now: i64,
    pub history_id: &'a str,
    /// Superusers are not asked for auth info.
    pub superuser: bool,
}

/// Put `resource` into a pending transfer towards `req.gaining_client_id`.
pub fn request_transfer(
    resource: &mut EppResource,
    req: &TransferRequest<'_>,
    automatic_transfer_secs: i64,
    policy: Option<&TldPolicy>,
    changes: &mut Changeset,
) -> FlowResult<()> {
    if resource.transfer_data.is_pending() {
        return Err(FlowError::AlreadyPendingTransfer);
    }
    for status in [
        StatusValue::ClientTransferProhibited,
        StatusValue::ServerTransferProhibited,
        StatusValue::PendingDelete,
    ] {
        if resource.has_status(status) {
            return Err(FlowError::NotEligibleForTransfer(status.to_string()));
        }
    }
    if !req.superuser && resource.auth_info() != Some(req.auth_info) {
        return Err(FlowError::BadAuthInfo);
    }
    if resource.current_sponsor_client_id == req.gaining_client_id {
        return Err(FlowError::AlreadySponsored);
    }
    if !(1..=MAX_REGISTRATION_YEARS).contains(&req.period_years) {
        return Err(FlowError::ExceedsMaxRegistrationYears);
    }

    let losing = resource.current_sponsor_client_id.clone();
    let deadline = req.now + automatic_transfer_secs;
    let effects = plan_approval(
        &ApprovalPlan {
            resource,
            gaining_client_id: req.gaining_client_id,
            losing_client_id: &losing,
            approve_time: deadline,
            period_years: req.period_years,
            status: TransferStatus::ServerApproved,
            history_id: &new_id(),
        },
        policy,
    )?;
    if let Some(expiration) = effects.new_expiration_time {
        if expiration > plus_years(deadline, MAX_REGISTRATION_YEARS)? {
            return Err(FlowError::ExceedsMaxRegistrationYears);
        }
    }

    changes.poll_messages.push(PollMessage {
        id: new_id(),
        kind: PollMessageKind::OneTime,
        client_id: losing.clone(),
        repo_id: resource.repo_id.clone(),
        target_id: resource.unique_id().to_string(),
        event_time: req.now,
        message: format!(
            "Transfer requested by {}; automatic approval at {}.",
            req.gaining_client_id,
            format_time(deadline)
        ),
        autorenew_end_time: None,
        history_id: req.history_id.to_string(),
    });

    resource.transfer_data = TransferData {
        status: TransferStatus::Pending,
        gaining_client_id: Some(req.gaining_client_id.to_string()),
        losing_client_id: Some(losing),
        request_time: Some(req.now),
        pending_expiration_time: Some(deadline),
        extended_registration_years: req.period_years,
        server_approve: Some(effects),
    };
    resource.status_values.insert(StatusValue::PendingTransfer);
    resource.touch(req.gaining_client_id, req.now);
    Ok(())
}

/// Client action on a pending transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    Approve,
    Reject,
    Cancel,
}

impl TransferAction {
    pub const fn terminal_status(self) -> TransferStatus {
        match self {
            Self::Approve => TransferStatus::ClientApproved,
            Self::Reject => TransferStatus::ClientRejected,
            Self::Cancel => TransferStatus::ClientCancelled,
        }
    }
}

/// Approve and reject belong to the losing registrar, cancel to the gaining
/// one. Superusers may do any of them.
pub fn check_actor(
    data: &TransferData,
    actor: &str,
    superuser: bool,
    action: TransferAction,
) -> FlowResult<()> {
    if !data.is_pending() {
        return Err(FlowError::NotPendingTransfer);
    }
    if superuser {
        return Ok(());
    }
    let owner = match action {
        TransferAction::Approve | TransferAction::Reject => data.losing_client_id.as_deref(),
        TransferAction::Cancel => data.gaining_client_id.as_deref(),
    };
    if owner == Some(actor) {
        Ok(())
    } else {
        Err(FlowError::UnauthorizedTransferAction)
    }
}

/// Only the two parties to a transfer (or a superuser) may query it.
pub fn check_query(data: &TransferData, actor: &str, superuser: bool) -> FlowResult<()> {
    if data.status == TransferStatus::None || data.gaining_client_id.is_none() {
        return Err(FlowError::NoTransferHistory);
    }
    if superuser
        || data.gaining_client_id.as_deref() == Some(actor)
        || data.losing_client_id.as_deref() == Some(actor)
    {
        Ok(())
    } else {
        Err(FlowError::UnauthorizedTransferAction)
    }
}

/// Reject or cancel: discard the planned effects and notify the other party.
pub fn close_transfer(
    resource: &mut EppResource,
    action: TransferAction,
    actor: &str,
    now: i64,
    history_id: &str,
    changes: &mut Changeset,
) {
    let (notify, verb) = match action {
        TransferAction::Cancel => (resource.transfer_data.losing_client_id.clone(), "cancelled"),
        TransferAction::Reject | TransferAction::Approve => {
            (resource.transfer_data.gaining_client_id.clone(), "rejected")
        }
    };
    if let Some(client_id) = notify {
        changes.poll_messages.push(PollMessage {
            id: new_id(),
            kind: PollMessageKind::OneTime,
            client_id,
            repo_id: resource.repo_id.clone(),
            target_id: resource.unique_id().to_string(),
            event_time: now,
            message: format!("Transfer {verb}."),
            autorenew_end_time: None,
            history_id: history_id.to_string(),
        });
    }

    resource.transfer_data.status = action.terminal_status();
    resource.transfer_data.server_approve = None;
    resource.transfer_data.pending_expiration_time = Some(now);
    resource.status_values.remove(&StatusValue::PendingTransfer);
    resource.touch(actor, now);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use registry_core::clock::DAY;

    fn pending(deadline: i64) -> TransferData {
        TransferData {
            status: TransferStatus::Pending,
            gaining_client_id: Some("NewRegistrar".into()),
            losing_client_id: Some("TheRegistrar".into()),
            request_time: Some(deadline - 5 * DAY),
            pending_expiration_time: Some(deadline),
            extended_registration_years: 1,
            server_approve: Some(ServerApproveEffects {
                history_id: "h-approve".into(),
                ..ServerApproveEffects::default()
            }),
        }
    }

    #[test]
    fn pending_before_deadline_resolves_to_itself() {
        let data = pending(1_000);
        let resolution = resolve(&data, 999);
        assert_eq!(resolution.effective, data);
        assert!(resolution.effects.is_none());
    }

    #[test]
    fn pending_at_deadline_resolves_to_server_approved() {
        let resolution = resolve(&pending(1_000), 1_000);
        assert_eq!(resolution.effective.status, TransferStatus::ServerApproved);
        assert!(resolution.effective.server_approve.is_none());
        assert_eq!(resolution.effects.unwrap().history_id, "h-approve");
    }

    #[test]
    fn terminal_records_never_resolve_again() {
        let mut data = pending(1_000);
        data.status = TransferStatus::ClientRejected;
        assert!(resolve(&data, 5_000).effects.is_none());
    }

    #[test]
    fn actor_rules() {
        let data = pending(1_000);
        assert!(check_actor(&data, "TheRegistrar", false, TransferAction::Approve).is_ok());
        assert!(check_actor(&data, "TheRegistrar", false, TransferAction::Reject).is_ok());
        assert!(matches!(
            check_actor(&data, "NewRegistrar", false, TransferAction::Approve),
            Err(FlowError::UnauthorizedTransferAction)
        ));
        assert!(check_actor(&data, "NewRegistrar", false, TransferAction::Cancel).is_ok());
        assert!(matches!(
            check_actor(&data, "TheRegistrar", false, TransferAction::Cancel),
            Err(FlowError::UnauthorizedTransferAction)
        ));
        assert!(check_actor(&data, "Someone", true, TransferAction::Cancel).is_ok());
        assert!(matches!(
            check_actor(&TransferData::default(), "TheRegistrar", false, TransferAction::Approve),
            Err(FlowError::NotPendingTransfer)
        ));
    }

    #[test]
    fn query_limited_to_parties() {
        let data = pending(1_000);
        assert!(check_query(&data, "NewRegistrar", false).is_ok());
        assert!(check_query(&data, "TheRegistrar", false).is_ok());
        assert!(matches!(
            check_query(&data, "Other", false),
            Err(FlowError::UnauthorizedTransferAction)
        ));
        assert!(matches!(
            check_query(&TransferData::default(), "TheRegistrar", false),
            Err(FlowError::NoTransferHistory)
        ));
    }

    #[test]
    fn expiration_rolls_forward_past_approval() {
        let expiration = 1_000 * DAY;
        let later = transferred_expiration(expiration, expiration + 10 * DAY, 1).unwrap();
        assert_eq!(later, plus_years(expiration, 2).unwrap());
        let earlier = transferred_expiration(expiration, expiration - DAY, 1).unwrap();
        assert_eq!(earlier, plus_years(expiration, 1).unwrap());
    }
}
