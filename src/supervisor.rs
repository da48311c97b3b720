use crate::connection::Transport;
use crate::error::{EvokError, Result};
use crate::ingest::{self, Disconnect};
use crate::protocol::Request;
use crate::session::SessionContext;
use crate::sync;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Connection lifecycle of a controller session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    SyncingState,
    Streaming,
}

/// Request forwarded from the session to the task owning the transport
pub(crate) struct Command {
    pub(crate) request: Request,
    pub(crate) reply: oneshot::Sender<Result<()>>,
}

/// Long-lived task owning one controller connection
///
/// Connect, sync, stream until the connection fails, wait the reconnect
/// interval, repeat. Retries forever at a fixed interval; only cancellation
/// ends it. Nothing inside escapes: every failure is logged and turned into a
/// reconnect.
pub(crate) struct Supervisor {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) reconnect_interval: Duration,
    pub(crate) state_tx: watch::Sender<SessionState>,
    pub(crate) commands: mpsc::Receiver<Command>,
    pub(crate) cancel: CancellationToken,
}

impl Supervisor {
    /// Run until cancelled
    ///
    /// `connected` skips the first connect and sync when the caller has
    /// already done both.
    pub(crate) async fn run(mut self, connected: bool) {
        let mut connected = connected;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !connected && !self.establish().await {
                if !self.pause().await {
                    break;
                }
                continue;
            }
            connected = false;

            self.set_state(SessionState::Streaming);
            let reason = ingest::run(
                self.transport.as_mut(),
                &self.ctx,
                &mut self.commands,
                &self.cancel,
            )
            .await;

            self.transport.close().await;
            self.set_state(SessionState::Disconnected);

            match reason {
                Disconnect::Cancelled => break,
                Disconnect::Failed(e) => {
                    tracing::debug!(controller = %self.ctx.id, "Streaming stopped: {}", e);
                }
                other => {
                    tracing::debug!(controller = %self.ctx.id, "Streaming stopped: {:?}", other);
                }
            }

            tracing::info!(
                "Reconnecting to UniPi device '{}' in {} seconds",
                self.ctx.id,
                self.reconnect_interval.as_secs()
            );
            if !self.pause().await {
                break;
            }
        }

        self.transport.close().await;
        self.set_state(SessionState::Disconnected);
        tracing::debug!(controller = %self.ctx.id, "Supervisor stopped");
    }

    /// Connect and run the full-state sync
    ///
    /// Returns false when either fails; the transport is closed by then.
    async fn establish(&mut self) -> bool {
        self.set_state(SessionState::Connecting);

        let Some(connected) =
            refusing_commands(self.transport.connect(), &mut self.commands, &self.cancel).await
        else {
            return false;
        };
        if let Err(e) = connected {
            tracing::warn!(
                "Could not connect to UniPi device '{}': {}. Retrying in {} seconds.",
                self.ctx.id,
                e,
                self.reconnect_interval.as_secs()
            );
            self.set_state(SessionState::Disconnected);
            return false;
        }
        tracing::info!("Connected to UniPi device '{}' via Evok", self.ctx.id);

        self.set_state(SessionState::SyncingState);
        let Some(synced) = refusing_commands(
            sync::full_state_sync(self.transport.as_mut(), &self.ctx),
            &mut self.commands,
            &self.cancel,
        )
        .await
        else {
            return false;
        };
        if let Err(e) = synced {
            tracing::warn!("Full-state sync with UniPi device '{}' failed: {}", self.ctx.id, e);
            self.transport.close().await;
            self.set_state(SessionState::Disconnected);
            return false;
        }

        true
    }

    /// Sleep the reconnect interval
    ///
    /// Returns false when cancelled.
    async fn pause(&mut self) -> bool {
        refusing_commands(sleep(self.reconnect_interval), &mut self.commands, &self.cancel)
            .await
            .is_some()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(controller = %self.ctx.id, from = ?current, to = ?state, "Session state");
            *current = state;
            true
        });
    }
}

/// Drive `work` to completion while no connection is streaming
///
/// Commands arriving meanwhile are refused with `NotConnected` rather than
/// queued for the next connection. Returns `None` when cancelled.
async fn refusing_commands<F: Future>(
    work: F,
    commands: &mut mpsc::Receiver<Command>,
    cancel: &CancellationToken,
) -> Option<F::Output> {
    tokio::pin!(work);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            output = &mut work => return Some(output),
            Some(command) = commands.recv() => {
                let _ = command.reply.send(Err(EvokError::NotConnected));
            }
        }
    }
}
