use std::collections::BTreeSet;

use registry_core::clock::DAY;

use super::*;
use crate::error::FlowError;
use crate::model::{HistoryType, ResourceKind, StatusValue, TransferStatus};
use crate::test_helpers::{AUTH_INFO, NEW_REGISTRAR, Registry, T0, THE_REGISTRAR};

fn contact_create(id: &str) -> Command {
    Command::new(ObjectType::Contact, Verb::Create, id).with_attributes(Attributes::ContactCreate(
        ContactCreate {
            name: "Jane Roe".into(),
            email: "jr@example.tld".into(),
            voice: Some("+1.5555551212".into()),
            auth_info: AUTH_INFO.into(),
        },
    ))
}

fn contact_update(id: &str, attrs: ContactUpdate) -> Command {
    Command::new(ObjectType::Contact, Verb::Update, id)
        .with_attributes(Attributes::ContactUpdate(attrs))
}

fn contact_transfer(verb: Verb, id: &str) -> Command {
    let command = Command::new(ObjectType::Contact, verb, id);
    if verb == Verb::TransferRequest {
        command.with_attributes(Attributes::TransferRequest(TransferRequestAttributes {
            auth_info: AUTH_INFO.into(),
            period_years: 1,
        }))
    } else {
        command
    }
}

#[tokio::test]
async fn create_validates_id_and_uniqueness() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;

    let response = registry
        .run(&mut session, contact_create("jd1234"))
        .await
        .unwrap();
    let FlowResponse::Created {
        repo_id,
        expiration_time,
    } = response
    else {
        panic!("expected created");
    };
    assert!(expiration_time.is_none());
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_eq!(contact.repo_id, repo_id);
    assert_eq!(contact.current_sponsor_client_id, THE_REGISTRAR);
    assert_eq!(
        registry.history_types(&repo_id).await,
        vec![HistoryType::ContactCreate]
    );

    let err = registry
        .run(&mut session, contact_create("jd1234"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::AlreadyExists { .. }));

    for bad in ["ab", "abcdefghijklmnopq"] {
        let err = registry
            .run(&mut session, contact_create(bad))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MalformedCommand(_)), "{bad}");
    }
}

#[tokio::test]
async fn update_changes_fields_for_sponsor_only() {
    let registry = Registry::new().await;
    let mut owner = registry.login(THE_REGISTRAR).await;
    registry.create_contact(&mut owner, "jd1234").await;

    let change_email = contact_update(
        "jd1234",
        ContactUpdate {
            email: Some("new@example.tld".into()),
            ..ContactUpdate::default()
        },
    );
    let mut other = registry.login(NEW_REGISTRAR).await;
    let err = registry
        .run(&mut other, change_email.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotAuthorized(_)));

    registry.run(&mut owner, change_email).await.unwrap();
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    let data = contact.contact().unwrap();
    assert_eq!(data.email, "new@example.tld");
    assert_eq!(data.name, "John Doe");
}

#[tokio::test]
async fn info_redacts_for_other_registrars() {
    let registry = Registry::new().await;
    let mut owner = registry.login(THE_REGISTRAR).await;
    registry.create_contact(&mut owner, "jd1234").await;
    let info = Command::new(ObjectType::Contact, Verb::Info, "jd1234");

    let mut other = registry.login(NEW_REGISTRAR).await;
    let FlowResponse::Resource(seen) = registry.run(&mut other, info.clone()).await.unwrap() else {
        panic!("expected resource");
    };
    assert_eq!(seen.auth_info(), Some(""));

    let mut admin = registry.superuser(NEW_REGISTRAR).await;
    let FlowResponse::Resource(seen) = registry.run(&mut admin, info).await.unwrap() else {
        panic!("expected resource");
    };
    assert_eq!(seen.auth_info(), Some(AUTH_INFO));
}

#[tokio::test]
async fn referenced_contact_cannot_be_deleted() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;
    registry.create_contact(&mut session, "jd1234").await;
    registry
        .run(
            &mut session,
            Command::new(ObjectType::Domain, Verb::Create, "foo.example").with_attributes(
                Attributes::DomainCreate(DomainCreate {
                    period_years: 1,
                    registrant: Some("jd1234".into()),
                    contacts: vec![ContactRef {
                        contact_type: crate::model::ContactType::Tech,
                        contact_id: "jd1234".into(),
                    }],
                    nameservers: BTreeSet::new(),
                    ds_data: BTreeSet::new(),
                    auth_info: AUTH_INFO.into(),
                }),
            ),
        )
        .await
        .unwrap();

    let delete = Command::new(ObjectType::Contact, Verb::Delete, "jd1234");
    let err = registry
        .run(&mut session, delete.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::ResourceInUse(_)));

    // Once the domain is gone the contact is free.
    registry
        .run(
            &mut session,
            Command::new(ObjectType::Domain, Verb::Delete, "foo.example"),
        )
        .await
        .unwrap();
    registry.clock.advance_days(1);
    registry.run(&mut session, delete).await.unwrap();
}

#[tokio::test]
async fn deleted_contact_id_can_be_reused() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;
    registry.create_contact(&mut session, "jd1234").await;
    let first = registry.load(ResourceKind::Contact, "jd1234").await.repo_id;

    registry
        .run(
            &mut session,
            Command::new(ObjectType::Contact, Verb::Delete, "jd1234"),
        )
        .await
        .unwrap();
    let err = registry
        .run(
            &mut session,
            Command::new(ObjectType::Contact, Verb::Info, "jd1234"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NotFound { .. }));

    registry.clock.advance(1);
    registry.create_contact(&mut session, "jd1234").await;
    let second = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_ne!(second.repo_id, first);
    assert!(second.is_active_at(registry.now()));
}

#[tokio::test]
async fn delete_prohibited_by_client_status() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;
    registry.create_contact(&mut session, "jd1234").await;
    registry
        .run(
            &mut session,
            contact_update(
                "jd1234",
                ContactUpdate {
                    add_statuses: BTreeSet::from([StatusValue::ClientDeleteProhibited]),
                    ..ContactUpdate::default()
                },
            ),
        )
        .await
        .unwrap();

    let err = registry
        .run(
            &mut session,
            Command::new(ObjectType::Contact, Verb::Delete, "jd1234"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::StatusProhibitsOperation(StatusValue::ClientDeleteProhibited)
    ));
}

#[tokio::test]
async fn contact_transfer_approve_moves_sponsor_without_billing() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_contact(&mut losing, "jd1234").await;

    let FlowResponse::Transfer(data) = registry
        .run(&mut gaining, contact_transfer(Verb::TransferRequest, "jd1234"))
        .await
        .unwrap()
    else {
        panic!("expected transfer data");
    };
    assert_eq!(data.status, TransferStatus::Pending);
    assert_eq!(data.pending_expiration_time, Some(T0 + 5 * DAY));

    registry
        .run(&mut losing, contact_transfer(Verb::TransferApprove, "jd1234"))
        .await
        .unwrap();
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_eq!(contact.current_sponsor_client_id, NEW_REGISTRAR);
    assert_eq!(contact.transfer_data.status, TransferStatus::ClientApproved);
    assert!(registry.billing(&contact.repo_id).await.is_empty());
    assert_eq!(
        registry.history_types(&contact.repo_id).await,
        vec![
            HistoryType::ContactCreate,
            HistoryType::ContactTransferRequest,
            HistoryType::ContactTransferApprove
        ]
    );
}

#[tokio::test]
async fn contact_transfer_auto_approves_after_deadline() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_contact(&mut losing, "jd1234").await;
    registry
        .run(&mut gaining, contact_transfer(Verb::TransferRequest, "jd1234"))
        .await
        .unwrap();

    registry.clock.advance(5 * DAY - 1);
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_eq!(contact.transfer_data.status, TransferStatus::Pending);

    registry.clock.advance(1);
    let FlowResponse::Transfer(data) = registry
        .run(&mut losing, contact_transfer(Verb::TransferQuery, "jd1234"))
        .await
        .unwrap()
    else {
        panic!("expected transfer data");
    };
    assert_eq!(data.status, TransferStatus::ServerApproved);
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_eq!(contact.current_sponsor_client_id, NEW_REGISTRAR);
    assert_eq!(
        registry.history_types(&contact.repo_id).await.last(),
        Some(&HistoryType::ContactTransferServerApprove)
    );
}

#[tokio::test]
async fn contact_delete_cancels_pending_transfer() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_contact(&mut losing, "jd1234").await;
    registry
        .run(&mut gaining, contact_transfer(Verb::TransferRequest, "jd1234"))
        .await
        .unwrap();

    registry
        .run(
            &mut losing,
            Command::new(ObjectType::Contact, Verb::Delete, "jd1234"),
        )
        .await
        .unwrap();
    let contact = registry.load(ResourceKind::Contact, "jd1234").await;
    assert_eq!(contact.transfer_data.status, TransferStatus::ServerCancelled);
    assert!(!contact.has_status(StatusValue::PendingTransfer));
}
