//! Billing events and grace periods.
//!
//! Billable actions produce one-time events billed once their grace period
//! has passed. Each sponsorship carries one recurring autorenew event and a
//! matching autorenew poll message. Reversal inside a grace period voids the
//! billing and records a cancellation.

use std::collections::BTreeSet;

use registry_core::TldPolicy;
use registry_core::clock::END_OF_TIME;
use tracing::{debug, info};

use crate::error::{FlowError, FlowResult};
use crate::model::{
    BillingEvent, BillingEventKind, BillingFlag, BillingReason, DomainData, EppResource,
    GracePeriod, GracePeriodType, PollMessage, PollMessageKind, new_id,
};
use crate::storage::{BillingUpdate, Changeset, PollUpdate, StoreTxn};

/// Length of a grace period of `grace_type` under `policy`, in seconds.
pub const fn grace_period_length(policy: &TldPolicy, grace_type: GracePeriodType) -> i64 {
    match grace_type {
        GracePeriodType::Add => policy.add_grace_period_secs,
        GracePeriodType::Renew => policy.renew_grace_period_secs,
        GracePeriodType::Transfer => policy.transfer_grace_period_secs,
        GracePeriodType::AutoRenew => policy.autorenew_grace_period_secs,
        GracePeriodType::Redemption => policy.redemption_grace_period_secs,
    }
}

/// Grace period that covers a one-time event for `reason`.
const fn grace_type_for(reason: BillingReason) -> GracePeriodType {
    match reason {
        BillingReason::Create => GracePeriodType::Add,
        BillingReason::Renew => GracePeriodType::Renew,
        BillingReason::Transfer => GracePeriodType::Transfer,
        BillingReason::AutoRenew => GracePeriodType::AutoRenew,
    }
}

/// Price of one registration year for `reason`.
pub const fn unit_cost(policy: &TldPolicy, reason: BillingReason) -> i64 {
    match reason {
        BillingReason::Create => policy.create_cost,
        BillingReason::Renew | BillingReason::AutoRenew => policy.renew_cost,
        BillingReason::Transfer => policy.transfer_cost,
    }
}

/// Parameters for a one-time billable action.
pub struct BillableAction<'a> {
    pub reason: BillingReason,
    pub resource: &'a EppResource,
    pub client_id: &'a str,
    pub period_years: u32,
    pub event_time: i64,
    pub history_id: &'a str,
}

/// One-time event for `action`, billed when its grace period closes.
pub fn record_billable_action(action: &BillableAction<'_>, policy: &TldPolicy) -> BillingEvent {
    let grace = grace_period_length(policy, grace_type_for(action.reason));
    BillingEvent {
        id: new_id(),
        kind: BillingEventKind::OneTime,
        reason: action.reason,
        repo_id: action.resource.repo_id.clone(),
        target_id: action.resource.unique_id().to_string(),
        client_id: action.client_id.to_string(),
        cost: unit_cost(policy, action.reason) * i64::from(action.period_years),
        currency: policy.currency.clone(),
        period_years: action.period_years,
        event_time: action.event_time,
        billing_time: action.event_time + grace,
        recurrence_end_time: None,
        cancelled_event_id: None,
        voided: false,
        flags: BTreeSet::new(),
        history_id: action.history_id.to_string(),
    }
}

/// Open-ended autorenew obligation for `client_id`, first due at
/// `expiration_time`.
pub fn recurring_autorenew(
    resource: &EppResource,
    client_id: &str,
    expiration_time: i64,
    history_id: &str,
    policy: &TldPolicy,
) -> BillingEvent {
    BillingEvent {
        id: new_id(),
        kind: BillingEventKind::Recurring,
        reason: BillingReason::AutoRenew,
        repo_id: resource.repo_id.clone(),
        target_id: resource.unique_id().to_string(),
        client_id: client_id.to_string(),
        cost: policy.renew_cost,
        currency: policy.currency.clone(),
        period_years: 1,
        event_time: expiration_time,
        billing_time: expiration_time + policy.autorenew_grace_period_secs,
        recurrence_end_time: Some(END_OF_TIME),
        cancelled_event_id: None,
        voided: false,
        flags: BTreeSet::from([BillingFlag::AutoRenew]),
        history_id: history_id.to_string(),
    }
}

/// Autorenew notice for `client_id`, delivered once per registration year.
pub fn autorenew_poll(
    resource: &EppResource,
    client_id: &str,
    expiration_time: i64,
    history_id: &str,
) -> PollMessage {
    PollMessage {
        id: new_id(),
        kind: PollMessageKind::Autorenew,
        client_id: client_id.to_string(),
        repo_id: resource.repo_id.clone(),
        target_id: resource.unique_id().to_string(),
        event_time: expiration_time,
        message: "Domain was auto-renewed.".to_string(),
        autorenew_end_time: Some(END_OF_TIME),
        history_id: history_id.to_string(),
    }
}

/// Open a grace period on `domain` starting at `start`.
pub fn open_grace_period(
    domain: &mut DomainData,
    grace_type: GracePeriodType,
    policy: &TldPolicy,
    start: i64,
    client_id: &str,
    billing_event_id: Option<String>,
) {
    domain.grace_periods.push(GracePeriod {
        grace_type,
        expiration_time: start + grace_period_length(policy, grace_type),
        billing_event_id,
        recurring_event_time: None,
        client_id: client_id.to_string(),
    });
}

/// Install a fresh autorenew event and poll message for `client_id` at
/// `expiration_time`, recording them on the domain.
pub fn install_autorenew(
    resource: &mut EppResource,
    client_id: &str,
    expiration_time: i64,
    history_id: &str,
    policy: &TldPolicy,
    changes: &mut Changeset,
) {
    let event = recurring_autorenew(resource, client_id, expiration_time, history_id, policy);
    let poll = autorenew_poll(resource, client_id, expiration_time, history_id);
    if let Some(domain) = resource.domain_mut() {
        domain.autorenew_billing_event = Some(event.id.clone());
        domain.autorenew_poll_message = Some(poll.id.clone());
    }
    changes.billing_events.push(event);
    changes.poll_messages.push(poll);
}

/// End the domain's current autorenew event and poll message at `at`.
pub fn end_autorenew(domain: &mut DomainData, at: i64, changes: &mut Changeset) {
    if let Some(id) = domain.autorenew_billing_event.take() {
        changes
            .billing_updates
            .push(BillingUpdate::EndRecurrence { id, at });
    }
    if let Some(id) = domain.autorenew_poll_message.take() {
        changes.poll_updates.push(PollUpdate::EndAutorenew { id, at });
    }
}

fn cancellation(
    refunded: &BillingEvent,
    event_time: i64,
    billing_time: i64,
    history_id: &str,
) -> BillingEvent {
    BillingEvent {
        id: new_id(),
        kind: BillingEventKind::Cancellation,
        reason: refunded.reason,
        repo_id: refunded.repo_id.clone(),
        target_id: refunded.target_id.clone(),
        client_id: refunded.client_id.clone(),
        cost: -refunded.cost,
        currency: refunded.currency.clone(),
        period_years: refunded.period_years,
        event_time,
        billing_time,
        recurrence_end_time: None,
        cancelled_event_id: Some(refunded.id.clone()),
        voided: false,
        flags: refunded.flags.clone(),
        history_id: history_id.to_string(),
    }
}

/// Reverse the most recent grace period of `grace_type` if it is still open
/// at `now`.
///
/// A one-time event is voided and refunded by a cancellation; an autorenew
/// grace refunds only the one occurrence it covers. Redemption carries no
/// billing. Returns the cancellation, if one was recorded.
pub async fn reverse_if_within_grace(
    txn: &mut StoreTxn,
    resource: &mut EppResource,
    grace_type: GracePeriodType,
    now: i64,
    history_id: &str,
    changes: &mut Changeset,
) -> FlowResult<Option<BillingEvent>> {
    let domain = resource
        .domain_mut()
        .ok_or(FlowError::NoGracePeriod(grace_type))?;
    let index = domain
        .grace_periods
        .iter()
        .rposition(|g| g.grace_type == grace_type)
        .ok_or(FlowError::NoGracePeriod(grace_type))?;

    if !domain.grace_periods[index].is_active_at(now) {
        return Err(FlowError::GracePeriodExpired(grace_type));
    }
    let grace = domain.grace_periods.remove(index);

    let Some(event_id) = grace.billing_event_id.as_deref() else {
        debug!(grace = %grace_type, "Reversed grace period without billing");
        return Ok(None);
    };
    let refunded = txn.load_billing_event(event_id).await?;

    let cancel = if grace_type == GracePeriodType::AutoRenew {
        let occurrence = grace.recurring_event_time.unwrap_or(refunded.event_time);
        cancellation(&refunded, occurrence, grace.expiration_time, history_id)
    } else {
        changes
            .billing_updates
            .push(BillingUpdate::Void(refunded.id.clone()));
        cancellation(&refunded, now, refunded.billing_time, history_id)
    };

    info!(
        repo_id = %refunded.repo_id,
        grace = %grace_type,
        cancelled = %refunded.id,
        "Billing reversed inside grace period"
    );
    changes.billing_events.push(cancel.clone());
    Ok(Some(cancel))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ResourceDetails, new_repo_id};
    use crate::test_helpers::{Registry, THE_REGISTRAR};
    use registry_core::clock::DAY;

    fn domain(now: i64) -> EppResource {
        EppResource::new(
            new_repo_id("example"),
            "TheRegistrar",
            now,
            ResourceDetails::Domain(DomainData {
                fully_qualified_domain_name: "example.example".into(),
                tld: "example".into(),
                registrant: None,
                contacts: BTreeSet::new(),
                nameservers: BTreeSet::new(),
                subordinate_hosts: BTreeSet::new(),
                ds_data: BTreeSet::new(),
                auth_info: "2fooBAR".into(),
                registration_expiration_time: now + 365 * DAY,
                grace_periods: Vec::new(),
                autorenew_billing_event: None,
                autorenew_poll_message: None,
            }),
        )
    }

    #[test]
    fn one_time_event_bills_after_grace() {
        let policy = TldPolicy::default();
        let resource = domain(1_000);
        let event = record_billable_action(
            &BillableAction {
                reason: BillingReason::Renew,
                resource: &resource,
                client_id: "TheRegistrar",
                period_years: 3,
                event_time: 2_000,
                history_id: "h1",
            },
            &policy,
        );
        assert_eq!(event.kind, BillingEventKind::OneTime);
        assert_eq!(event.cost, 3 * policy.renew_cost);
        assert_eq!(event.billing_time, 2_000 + policy.renew_grace_period_secs);
        assert_eq!(event.target_id, "example.example");
    }

    #[test]
    fn autorenew_installs_recurring_event_and_poll() {
        let policy = TldPolicy::default();
        let mut resource = domain(0);
        let mut changes = Changeset::default();
        install_autorenew(&mut resource, "TheRegistrar", 500, "h1", &policy, &mut changes);

        let event = &changes.billing_events[0];
        assert!(event.is_recurring());
        assert_eq!(event.recurrence_end_time, Some(END_OF_TIME));
        assert!(event.flags.contains(&BillingFlag::AutoRenew));
        let d = resource.domain().unwrap();
        assert_eq!(d.autorenew_billing_event.as_deref(), Some(event.id.as_str()));
        assert_eq!(
            d.autorenew_poll_message.as_deref(),
            Some(changes.poll_messages[0].id.as_str())
        );
    }

    #[test]
    fn ending_autorenew_clears_references() {
        let policy = TldPolicy::default();
        let mut resource = domain(0);
        let mut changes = Changeset::default();
        install_autorenew(&mut resource, "TheRegistrar", 500, "h1", &policy, &mut changes);

        let mut ended = Changeset::default();
        end_autorenew(resource.domain_mut().unwrap(), 700, &mut ended);
        assert_eq!(ended.billing_updates.len(), 1);
        assert_eq!(ended.poll_updates.len(), 1);
        assert!(resource.domain().unwrap().autorenew_billing_event.is_none());

        let mut again = Changeset::default();
        end_autorenew(resource.domain_mut().unwrap(), 800, &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn grace_period_closes_at_expiration() {
        let policy = TldPolicy::default();
        let mut resource = domain(0);
        let d = resource.domain_mut().unwrap();
        open_grace_period(d, GracePeriodType::Add, &policy, 100, "TheRegistrar", None);
        let end = 100 + policy.add_grace_period_secs;
        assert!(d.has_active_grace_period(GracePeriodType::Add, end - 1));
        assert!(!d.has_active_grace_period(GracePeriodType::Add, end));
    }

    #[tokio::test]
    async fn closed_grace_period_is_not_reversed() {
        let registry = Registry::new().await;
        let mut session = registry.login(THE_REGISTRAR).await;
        registry.create_domain(&mut session, "foo.example", 1).await;
        let created = registry.domain("foo.example").await;
        let add = created.domain().unwrap().grace_periods[0].clone();
        assert_eq!(add.grace_type, GracePeriodType::Add);
        let create_event = add.billing_event_id.clone().unwrap();

        let mut txn = registry.db.begin().await.unwrap();
        let mut resource = txn.load_any(&created.repo_id).await.unwrap();
        let mut changes = Changeset::default();
        let err = reverse_if_within_grace(
            &mut txn,
            &mut resource,
            GracePeriodType::Add,
            add.expiration_time,
            "h2",
            &mut changes,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::GracePeriodExpired(GracePeriodType::Add)
        ));
        assert!(changes.billing_updates.is_empty());
        assert!(changes.billing_events.is_empty());
        assert!(
            resource
                .domain()
                .unwrap()
                .grace_periods
                .iter()
                .any(|g| g.grace_type == GracePeriodType::Add)
        );

        // One second earlier the same grace period still reverses.
        let cancel = reverse_if_within_grace(
            &mut txn,
            &mut resource,
            GracePeriodType::Add,
            add.expiration_time - 1,
            "h2",
            &mut changes,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(cancel.cancelled_event_id.as_deref(), Some(create_event.as_str()));
        assert_eq!(
            changes.billing_updates,
            vec![BillingUpdate::Void(create_event.clone())]
        );
        drop(txn);

        let stored = registry.billing_by_id(&created.repo_id).await;
        assert!(!stored[&create_event].voided);
    }
}
