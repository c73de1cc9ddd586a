use std::collections::BTreeSet;

use registry_core::clock::{DAY, plus_years};

use super::*;
use crate::error::FlowError;
use crate::model::{
    BillingEventKind, BillingReason, GracePeriodType, HistoryType, ResourceKind, StatusValue,
    TransferData, TransferStatus,
};
use crate::lookup::{Viewer, lookup};
use crate::session::Session;
use crate::storage::RegistryDatabase;
use crate::test_helpers::{AUTH_INFO, NEW_REGISTRAR, Registry, T0, THE_REGISTRAR, date_of};

fn transfer(verb: Verb, name: &str) -> Command {
    Command::new(ObjectType::Domain, verb, name)
}

fn request(name: &str, auth_info: &str) -> Command {
    transfer(Verb::TransferRequest, name).with_attributes(Attributes::TransferRequest(
        TransferRequestAttributes {
            auth_info: auth_info.into(),
            period_years: 1,
        },
    ))
}

fn transfer_data(response: FlowResponse) -> TransferData {
    match response {
        FlowResponse::Transfer(data) => data,
        other => panic!("expected transfer data, got {other:?}"),
    }
}

/// `foo.example` owned by `TheRegistrar` with a transfer to `NewRegistrar`
/// pending since `T0`.
async fn pending_transfer() -> (Registry, Session, Session, i64) {
    pending_transfer_in(Registry::new().await).await
}

async fn pending_transfer_in(registry: Registry) -> (Registry, Session, Session, i64) {
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    let expiration = registry.create_domain(&mut losing, "foo.example", 1).await;
    registry
        .run(&mut gaining, request("foo.example", AUTH_INFO))
        .await
        .unwrap();
    (registry, losing, gaining, expiration)
}

#[tokio::test]
async fn request_records_pending_transfer_and_notifies_losing_registrar() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_domain(&mut losing, "foo.example", 1).await;

    let data = transfer_data(
        registry
            .run(&mut gaining, request("foo.example", AUTH_INFO))
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::Pending);
    assert_eq!(data.gaining_client_id.as_deref(), Some(NEW_REGISTRAR));
    assert_eq!(data.losing_client_id.as_deref(), Some(THE_REGISTRAR));
    assert_eq!(data.request_time, Some(T0));
    assert_eq!(data.pending_expiration_time, Some(T0 + 5 * DAY));

    let domain = registry.domain("foo.example").await;
    assert!(domain.has_status(StatusValue::PendingTransfer));
    assert_eq!(domain.current_sponsor_client_id, THE_REGISTRAR);

    let poll = Command::new(ObjectType::Poll, Verb::PollRequest, "");
    let FlowResponse::Poll { message, queue_len } =
        registry.run(&mut losing, poll).await.unwrap()
    else {
        panic!("expected poll response");
    };
    assert_eq!(queue_len, 1);
    let message = message.unwrap();
    assert_eq!(message.target_id, "foo.example");
    assert!(message.message.contains(NEW_REGISTRAR));
}

#[tokio::test]
async fn request_preconditions() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_domain(&mut losing, "foo.example", 1).await;

    let err = registry
        .run(&mut gaining, request("foo.example", "wrong"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::BadAuthInfo));

    let err = registry
        .run(&mut losing, request("foo.example", AUTH_INFO))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::AlreadySponsored));

    registry
        .run(
            &mut losing,
            Command::new(ObjectType::Domain, Verb::Update, "foo.example").with_attributes(
                Attributes::DomainUpdate(DomainUpdate {
                    add_statuses: BTreeSet::from([StatusValue::ClientTransferProhibited]),
                    ..DomainUpdate::default()
                }),
            ),
        )
        .await
        .unwrap();
    let err = registry
        .run(&mut gaining, request("foo.example", AUTH_INFO))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotEligibleForTransfer(_)));
}

#[tokio::test]
async fn second_request_while_pending_is_refused() {
    let (registry, _losing, mut gaining, _) = pending_transfer().await;
    let err = registry
        .run(&mut gaining, request("foo.example", AUTH_INFO))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::AlreadyPendingTransfer));
}

#[tokio::test]
async fn pending_transfer_blocks_renew() {
    let (registry, mut losing, _gaining, expiration) = pending_transfer().await;
    let err = registry
        .run(
            &mut losing,
            Command::new(ObjectType::Domain, Verb::Renew, "foo.example").with_attributes(
                Attributes::DomainRenew(DomainRenew {
                    current_expiration_date: date_of(expiration),
                    period_years: 1,
                }),
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::StatusProhibitsOperation(StatusValue::PendingTransfer)
    ));
}

#[tokio::test]
async fn approve_moves_sponsorship_and_bills_gaining_registrar() {
    let (registry, mut losing, mut gaining, expiration) = pending_transfer().await;
    registry.clock.advance_days(1);

    let err = registry
        .run(&mut gaining, transfer(Verb::TransferApprove, "foo.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::UnauthorizedTransferAction));

    let data = transfer_data(
        registry
            .run(&mut losing, transfer(Verb::TransferApprove, "foo.example"))
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::ClientApproved);

    let domain = registry.domain("foo.example").await;
    assert_eq!(domain.current_sponsor_client_id, NEW_REGISTRAR);
    assert_eq!(domain.last_transfer_time, Some(T0 + DAY));
    assert!(!domain.has_status(StatusValue::PendingTransfer));
    let data = domain.domain().unwrap();
    assert_eq!(
        data.registration_expiration_time,
        plus_years(expiration, 1).unwrap()
    );
    assert_eq!(data.grace_periods.len(), 1);
    assert_eq!(data.grace_periods[0].grace_type, GracePeriodType::Transfer);
    assert_eq!(data.grace_periods[0].client_id, NEW_REGISTRAR);

    let events = registry.billing(&domain.repo_id).await;
    let transfer_event = events
        .iter()
        .find(|e| e.reason == BillingReason::Transfer)
        .unwrap();
    assert_eq!(transfer_event.client_id, NEW_REGISTRAR);
    assert_eq!(transfer_event.cost, 1_100);
    let recurring: Vec<_> = events.iter().filter(|e| e.is_recurring()).collect();
    assert_eq!(recurring.len(), 2);
    let live: Vec<_> = recurring
        .iter()
        .filter(|e| e.recurrence_end_time > Some(T0 + DAY))
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].client_id, NEW_REGISTRAR);

    assert_eq!(
        registry.history_types(&domain.repo_id).await,
        vec![
            HistoryType::DomainCreate,
            HistoryType::DomainTransferRequest,
            HistoryType::DomainTransferApprove
        ]
    );

    // The old sponsor has lost control.
    let err = registry
        .run(
            &mut losing,
            Command::new(ObjectType::Domain, Verb::Delete, "foo.example"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotAuthorized(_)));
}

#[tokio::test]
async fn reject_keeps_sponsor_and_records_outcome() {
    let (registry, mut losing, mut gaining, _) = pending_transfer().await;

    let data = transfer_data(
        registry
            .run(&mut losing, transfer(Verb::TransferReject, "foo.example"))
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::ClientRejected);

    let domain = registry.domain("foo.example").await;
    assert_eq!(domain.current_sponsor_client_id, THE_REGISTRAR);
    assert!(!domain.has_status(StatusValue::PendingTransfer));
    assert!(
        registry
            .billing(&domain.repo_id)
            .await
            .iter()
            .all(|e| e.reason != BillingReason::Transfer)
    );

    // The gaining registrar can still see how its request ended.
    let data = transfer_data(
        registry
            .run(&mut gaining, transfer(Verb::TransferQuery, "foo.example"))
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::ClientRejected);

    let err = registry
        .run(&mut losing, transfer(Verb::TransferReject, "foo.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotPendingTransfer));

    // Nothing happens once the old deadline passes.
    registry.clock.advance_days(10);
    let domain = registry.domain("foo.example").await;
    assert_eq!(domain.current_sponsor_client_id, THE_REGISTRAR);
    assert_eq!(domain.transfer_data.status, TransferStatus::ClientRejected);
}

#[tokio::test]
async fn only_gaining_registrar_may_cancel() {
    let (registry, mut losing, mut gaining, _) = pending_transfer().await;

    let err = registry
        .run(&mut losing, transfer(Verb::TransferCancel, "foo.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::UnauthorizedTransferAction));

    let data = transfer_data(
        registry
            .run(&mut gaining, transfer(Verb::TransferCancel, "foo.example"))
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::ClientCancelled);
    let repo_id = registry.domain("foo.example").await.repo_id;
    assert_eq!(
        registry.history_types(&repo_id).await.last(),
        Some(&HistoryType::DomainTransferCancel)
    );
}

#[tokio::test]
async fn expired_transfer_is_approved_once_on_read() {
    let (registry, mut losing, mut gaining, expiration) = pending_transfer().await;
    registry.clock.advance_days(5);

    let first = registry.domain("foo.example").await;
    let second = registry.domain("foo.example").await;
    assert_eq!(first.current_sponsor_client_id, NEW_REGISTRAR);
    assert_eq!(first.transfer_data.status, TransferStatus::ServerApproved);
    assert_eq!(first.last_transfer_time, Some(T0 + 5 * DAY));
    assert_eq!(second.revision, first.revision);
    assert_eq!(
        first.expiration_time(),
        Some(plus_years(expiration, 1).unwrap())
    );

    let history = registry.db.history_for(&first.repo_id).await.unwrap();
    let approvals: Vec<_> = history
        .iter()
        .filter(|h| h.history_type == HistoryType::DomainTransferServerApprove)
        .collect();
    assert_eq!(approvals.len(), 1);
    assert!(!approvals[0].requested_by_registrar);
    assert_eq!(approvals[0].modification_time, T0 + 5 * DAY);

    let events = registry.billing(&first.repo_id).await;
    let transfers: Vec<_> = events
        .iter()
        .filter(|e| e.reason == BillingReason::Transfer && e.kind == BillingEventKind::OneTime)
        .collect();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].event_time, T0 + 5 * DAY);
    assert_eq!(transfers[0].history_id, approvals[0].id);

    // Both parties hear about it; the loser also still has the request notice.
    let poll = Command::new(ObjectType::Poll, Verb::PollRequest, "");
    let FlowResponse::Poll { queue_len, .. } =
        registry.run(&mut gaining, poll.clone()).await.unwrap()
    else {
        panic!("expected poll response");
    };
    assert_eq!(queue_len, 1);
    let FlowResponse::Poll { queue_len, .. } = registry.run(&mut losing, poll).await.unwrap()
    else {
        panic!("expected poll response");
    };
    assert_eq!(queue_len, 2);
}

#[tokio::test]
async fn concurrent_reads_settle_the_transfer_once() {
    let dir = tempfile::tempdir().unwrap();
    let db = RegistryDatabase::open(&dir.path().join("registry.db"))
        .await
        .unwrap();
    let (registry, ..) = pending_transfer_in(Registry::with_db(db).await).await;
    registry.clock.advance_days(6);
    let now = registry.now();

    let mut reads = tokio::task::JoinSet::new();
    for _ in 0..6 {
        let db = registry.db.clone();
        let retry = registry.dispatcher.config().retry.clone();
        reads.spawn(async move {
            let domain = lookup(
                &db,
                &retry,
                Viewer::Superuser,
                ResourceKind::Domain,
                "foo.example",
                now,
            )
            .await
            .unwrap();
            (
                domain.current_sponsor_client_id,
                domain.transfer_data.status,
                domain.revision,
            )
        });
    }
    let mut seen = Vec::new();
    while let Some(read) = reads.join_next().await {
        seen.push(read.unwrap());
    }

    let settled = registry.domain("foo.example").await;
    assert_eq!(seen.len(), 6);
    for (sponsor, status, revision) in &seen {
        assert_eq!(sponsor, NEW_REGISTRAR);
        assert_eq!(*status, TransferStatus::ServerApproved);
        assert_eq!(*revision, settled.revision);
    }

    let transfers = registry
        .billing(&settled.repo_id)
        .await
        .into_iter()
        .filter(|e| e.reason == BillingReason::Transfer && e.kind == BillingEventKind::OneTime)
        .count();
    assert_eq!(transfers, 1);
    let approvals = registry
        .history_types(&settled.repo_id)
        .await
        .into_iter()
        .filter(|t| *t == HistoryType::DomainTransferServerApprove)
        .count();
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn flows_see_the_settled_transfer() {
    let (registry, mut losing, mut gaining, _) = pending_transfer().await;
    registry.clock.advance_days(6);

    // The first command after the deadline applies the approval and then
    // runs against the new sponsor.
    let err = registry
        .run(&mut losing, transfer(Verb::TransferApprove, "foo.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotPendingTransfer));

    registry
        .run(
            &mut gaining,
            Command::new(ObjectType::Domain, Verb::Update, "foo.example").with_attributes(
                Attributes::DomainUpdate(DomainUpdate {
                    auth_info: Some("mine123".into()),
                    ..DomainUpdate::default()
                }),
            ),
        )
        .await
        .unwrap();
    let domain = registry.domain("foo.example").await;
    assert_eq!(domain.auth_info(), Some("mine123"));
}

#[tokio::test]
async fn delete_cancels_pending_transfer() {
    let (registry, mut losing, mut gaining, _) = pending_transfer().await;
    registry
        .run(
            &mut losing,
            Command::new(ObjectType::Domain, Verb::Delete, "foo.example"),
        )
        .await
        .unwrap();

    let domain = registry.domain("foo.example").await;
    assert_eq!(domain.transfer_data.status, TransferStatus::ServerCancelled);
    assert!(!domain.has_status(StatusValue::PendingTransfer));

    registry.clock.advance_days(10);
    let err = registry
        .run(&mut gaining, transfer(Verb::TransferQuery, "foo.example"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound { .. }));
    assert_eq!(
        registry.domain("foo.example").await.current_sponsor_client_id,
        THE_REGISTRAR
    );
}

#[tokio::test]
async fn superuser_may_approve_for_either_side() {
    let (registry, _losing, _gaining, _) = pending_transfer().await;
    let mut admin = registry.superuser(NEW_REGISTRAR).await;
    let data = transfer_data(
        registry
            .run(
                &mut admin,
                transfer(Verb::TransferApprove, "foo.example").acting_as(THE_REGISTRAR),
            )
            .await
            .unwrap(),
    );
    assert_eq!(data.status, TransferStatus::ClientApproved);
}
