use crate::connection::Transport;
use crate::error::{EvokError, Result};
use crate::protocol::{is_empty_message, updates};
use crate::session::SessionContext;
use crate::supervisor::Command;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why the ingestion loop stopped
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// Session teardown
    Cancelled,
    /// The controller closed the connection
    Closed,
    /// Nothing more to receive
    Ended,
    /// Anything unexpected while receiving or handling a message
    Failed(EvokError),
}

enum Step {
    Cancelled,
    Command(Command),
    Received(Result<Option<Value>>),
}

/// Stream updates into the cache until the connection stops being usable
///
/// Set commands from the session are forwarded in between messages, so the
/// transport keeps a single owner.
pub(crate) async fn run(
    transport: &mut dyn Transport,
    ctx: &SessionContext,
    commands: &mut mpsc::Receiver<Command>,
    cancel: &CancellationToken,
) -> Disconnect {
    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            Some(command) = commands.recv() => Step::Command(command),
            received = transport.receive() => Step::Received(received),
        };

        match step {
            Step::Cancelled => return Disconnect::Cancelled,
            Step::Command(command) => {
                if command.reply.is_closed() {
                    // Caller already gave up waiting
                    continue;
                }
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Disconnect::Cancelled,
                    result = transport.send(&command.request) => result,
                };
                if let Err(e) = &result {
                    tracing::warn!(controller = %ctx.id, "Failed to send command: {}", e);
                }
                let _ = command.reply.send(result);
            }
            Step::Received(Ok(Some(message))) => {
                if is_empty_message(&message) {
                    tracing::warn!(controller = %ctx.id, "Empty message from UniPi device");
                    return Disconnect::Ended;
                }
                let applied = apply(ctx, message);
                tracing::trace!(controller = %ctx.id, applied, "Applied updates");
            }
            Step::Received(Ok(None)) => {
                tracing::warn!(controller = %ctx.id, "Connection lost to UniPi device");
                return Disconnect::Ended;
            }
            Step::Received(Err(e)) if e.is_connection_closed() => {
                tracing::warn!(
                    controller = %ctx.id,
                    "Connection closed during receive from UniPi device: {}",
                    e
                );
                return Disconnect::Closed;
            }
            Step::Received(Err(e)) => {
                tracing::error!(controller = %ctx.id, "Unexpected error processing message: {}", e);
                return Disconnect::Failed(e);
            }
        }
    }
}

/// Merge every update in a message and announce each one
///
/// The cache write always happens before the notification for it.
pub(crate) fn apply(ctx: &SessionContext, message: Value) -> usize {
    let mut applied = 0;
    for update in updates(message) {
        tracing::trace!(controller = %ctx.id, dev = %update.address.device_type, circuit = %update.address.circuit, "Update");
        ctx.cache.merge_update(&update.address, &update.payload);
        ctx.notify(&update.address);
        applied += 1;
    }
    applied
}
