use registry_core::clock::{DAY, plus_years};

use super::*;
use crate::error::FlowError;
use crate::model::{PollMessage, PollMessageKind};
use crate::session::Session;
use crate::test_helpers::{AUTH_INFO, NEW_REGISTRAR, Registry, T0, THE_REGISTRAR};

fn poll_request() -> Command {
    Command::new(ObjectType::Poll, Verb::PollRequest, "")
}

fn poll_ack(id: &str) -> Command {
    Command::new(ObjectType::Poll, Verb::PollAck, id)
}

async fn poll(registry: &Registry, session: &mut Session) -> (Option<PollMessage>, i64) {
    match registry.run(session, poll_request()).await.unwrap() {
        FlowResponse::Poll { message, queue_len } => (message, queue_len),
        other => panic!("expected poll response, got {other:?}"),
    }
}

async fn request_transfer(registry: &Registry, session: &mut Session, name: &str) {
    registry
        .run(
            session,
            Command::new(ObjectType::Domain, Verb::TransferRequest, name).with_attributes(
                Attributes::TransferRequest(TransferRequestAttributes {
                    auth_info: AUTH_INFO.into(),
                    period_years: 1,
                }),
            ),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_queue() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;
    assert_eq!(poll(&registry, &mut session).await, (None, 0));
}

#[tokio::test]
async fn messages_arrive_oldest_first_and_leave_on_ack() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_domain(&mut losing, "foo.example", 1).await;
    registry.create_domain(&mut losing, "bar.example", 1).await;

    request_transfer(&registry, &mut gaining, "foo.example").await;
    registry.clock.advance(60);
    request_transfer(&registry, &mut gaining, "bar.example").await;

    let (message, queue_len) = poll(&registry, &mut losing).await;
    assert_eq!(queue_len, 2);
    let first = message.unwrap();
    assert_eq!(first.target_id, "foo.example");
    assert_eq!(first.kind, PollMessageKind::OneTime);
    assert_eq!(first.event_time, T0);

    // Polling again does not consume.
    let (again, _) = poll(&registry, &mut losing).await;
    assert_eq!(again.unwrap().id, first.id);

    let response = registry.run(&mut losing, poll_ack(&first.id)).await.unwrap();
    assert_eq!(
        response,
        FlowResponse::Poll {
            message: None,
            queue_len: 1
        }
    );
    let (next, queue_len) = poll(&registry, &mut losing).await;
    assert_eq!(queue_len, 1);
    assert_eq!(next.unwrap().target_id, "bar.example");

    let err = registry
        .run(&mut losing, poll_ack(&first.id))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::MessageNotFound(_)));
}

#[tokio::test]
async fn cannot_ack_another_registrars_message() {
    let registry = Registry::new().await;
    let mut losing = registry.login(THE_REGISTRAR).await;
    let mut gaining = registry.login(NEW_REGISTRAR).await;
    registry.create_domain(&mut losing, "foo.example", 1).await;
    request_transfer(&registry, &mut gaining, "foo.example").await;

    let (message, _) = poll(&registry, &mut losing).await;
    let id = message.unwrap().id;
    let err = registry.run(&mut gaining, poll_ack(&id)).await.unwrap_err();
    assert!(matches!(err, FlowError::MessageNotFound(_)));
    assert_eq!(poll(&registry, &mut losing).await.1, 1);

    let err = registry
        .run(&mut losing, poll_ack("no-such-message"))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::MessageNotFound(_)));
}

#[tokio::test]
async fn autorenew_message_recurs_yearly() {
    let registry = Registry::new().await;
    let mut session = registry.login(THE_REGISTRAR).await;
    let expiration = registry.create_domain(&mut session, "foo.example", 1).await;

    // Not deliverable before the expiration.
    assert_eq!(poll(&registry, &mut session).await, (None, 0));

    registry.clock.set(expiration + DAY);
    let (message, queue_len) = poll(&registry, &mut session).await;
    assert_eq!(queue_len, 1);
    let message = message.unwrap();
    assert_eq!(message.kind, PollMessageKind::Autorenew);
    assert_eq!(message.event_time, expiration);

    registry
        .run(&mut session, poll_ack(&message.id))
        .await
        .unwrap();
    assert_eq!(poll(&registry, &mut session).await, (None, 0));

    // The same message comes back a year later.
    let next_year = plus_years(expiration, 1).unwrap();
    registry.clock.set(next_year);
    let (again, _) = poll(&registry, &mut session).await;
    let again = again.unwrap();
    assert_eq!(again.id, message.id);
    assert_eq!(again.event_time, next_year);
}

#[tokio::test]
async fn poll_requires_login() {
    let registry = Registry::new().await;
    let mut session = Session::new(crate::session::AccessPath::Registrar);
    let err = registry.run(&mut session, poll_request()).await.unwrap_err();
    assert!(matches!(err, FlowError::NotLoggedIn));
}
