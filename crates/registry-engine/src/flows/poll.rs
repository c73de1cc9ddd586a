//! Poll queue: request the oldest deliverable message, acknowledge it.

use registry_core::clock::plus_years;
use tracing::{debug, instrument};

use super::FlowOutcome;
use super::command::Verb;
use super::context::FlowContext;
use super::dispatcher::FlowResponse;
use crate::error::{FlowError, FlowResult};
use crate::model::{PollMessage, PollMessageKind};
use crate::storage::{Changeset, PollUpdate, StoreTxn};

pub(crate) async fn run(
    verb: Verb,
    ctx: &FlowContext<'_>,
    txn: &mut StoreTxn,
    now: i64,
) -> FlowResult<FlowOutcome> {
    match verb {
        Verb::PollRequest => request(ctx, txn, now).await,
        Verb::PollAck => ack(ctx, txn, now).await,
        _ => Err(ctx.malformed()),
    }
}

fn is_deliverable(message: &PollMessage, client_id: &str, now: i64) -> bool {
    message.client_id == client_id
        && message.event_time <= now
        && message
            .autorenew_end_time
            .is_none_or(|end| message.event_time < end)
}

async fn request(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let message = txn.next_poll_message(ctx.client_id, now).await?;
    let queue_len = txn.count_poll_messages(ctx.client_id, now).await?;
    Ok(FlowOutcome::respond(FlowResponse::Poll { message, queue_len }))
}

/// Remove a one-time message; move an autorenew message to next year's
/// occurrence, or remove it once that falls past its end.
#[instrument(skip_all, fields(flow = "PollAck", message_id = %ctx.command.target_id))]
async fn ack(ctx: &FlowContext<'_>, txn: &mut StoreTxn, now: i64) -> FlowResult<FlowOutcome> {
    let id = ctx.command.target_id.as_str();
    let message = txn
        .find_poll_message(id)
        .await?
        .filter(|m| is_deliverable(m, ctx.client_id, now))
        .ok_or_else(|| FlowError::MessageNotFound(id.to_string()))?;

    let update = match message.kind {
        PollMessageKind::OneTime => PollUpdate::Delete(message.id),
        PollMessageKind::Autorenew => {
            let next = plus_years(message.event_time, 1)?;
            if message.autorenew_end_time.is_some_and(|end| next >= end) {
                PollUpdate::Delete(message.id)
            } else {
                PollUpdate::Advance {
                    id: message.id,
                    event_time: next,
                }
            }
        }
    };
    debug!(?update, "Poll message acknowledged");

    let mut changes = Changeset {
        poll_updates: vec![update],
        ..Changeset::default()
    };
    txn.save(&mut changes).await?;
    let queue_len = txn.count_poll_messages(ctx.client_id, now).await?;
    Ok(FlowOutcome::respond(FlowResponse::Poll {
        message: None,
        queue_len,
    }))
}
