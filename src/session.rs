use crate::cache::{StateCache, SupplementMerge};
use crate::config::SessionConfig;
use crate::connection::{EvokTransport, Transport};
use crate::error::{EvokError, Result};
use crate::protocol::Request;
use crate::rest::RestClient;
use crate::subscription::{ChangeNotifier, NotificationKey, Subscription};
use crate::supervisor::{Command, SessionState, Supervisor};
use crate::sync;
use crate::types::{ControllerId, DeviceAddress, DeviceState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Everything the supervisor's stages share
pub(crate) struct SessionContext {
    pub(crate) id: ControllerId,
    pub(crate) cache: Arc<StateCache>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) rest: Option<RestClient>,
    pub(crate) supplement_merge: SupplementMerge,
}

impl SessionContext {
    pub(crate) fn notify(&self, address: &DeviceAddress) {
        self.notifier
            .notify(&NotificationKey::new(self.id.clone(), address.clone()));
    }
}

/// Live session with one UniPi controller
///
/// Owns the device-state cache and a background task that keeps the
/// connection alive. Creation fails if the controller cannot be reached and
/// synced once; after that, outages are healed in the background and only
/// show up as a pause in change notifications.
///
/// # Example
///
/// ```no_run
/// use unipi_evok::{ChangeNotifier, ControllerSession, DeviceAddress, SessionConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let notifier = ChangeNotifier::new();
///     let config = SessionConfig::new("192.168.1.40").with_name("Basement");
///     let mut session = ControllerSession::connect(config, notifier).await?;
///
///     let relay = DeviceAddress::new("relay", "1_01");
///     let mut changes = session.subscribe(relay.clone());
///     session.send(relay.clone(), "1").await?;
///
///     changes.recv().await?;
///     println!("relay is now {:?}", session.get(&relay).and_then(|s| s.value().cloned()));
///
///     session.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ControllerSession {
    config: SessionConfig,
    ctx: Arc<SessionContext>,
    state_rx: watch::Receiver<SessionState>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ControllerSession {
    /// Connect to the controller over the Evok WebSocket
    pub async fn connect(config: SessionConfig, notifier: ChangeNotifier) -> Result<Self> {
        config.validate()?;
        let transport = EvokTransport::new(config.ws_url()?);
        Self::with_transport(config, transport, notifier).await
    }

    /// Start a session over a caller-supplied transport
    ///
    /// Performs the first connect and full-state sync before returning, so
    /// the cache is populated as soon as the session exists.
    pub async fn with_transport<T>(
        config: SessionConfig,
        transport: T,
        notifier: ChangeNotifier,
    ) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;

        let rest = if config.fetch_rest {
            Some(RestClient::new(config.rest_url()?, config.rest_timeout())?)
        } else {
            None
        };

        let ctx = Arc::new(SessionContext {
            id: config.controller_id(),
            cache: Arc::new(StateCache::new()),
            notifier,
            rest,
            supplement_merge: config.supplement_merge,
        });

        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let mut transport: Box<dyn Transport> = Box::new(transport);

        if let Err(e) = transport.connect().await {
            tracing::warn!("Could not connect to UniPi at {}: {}", config.host, e);
            return Err(e);
        }
        tracing::info!("Connected to UniPi device '{}' via Evok", ctx.id);

        let _ = state_tx.send(SessionState::SyncingState);
        if let Err(e) = sync::full_state_sync(transport.as_mut(), &ctx).await {
            tracing::warn!("Initial full-state sync with UniPi at {} failed: {}", config.host, e);
            transport.close().await;
            return Err(e);
        }

        let _ = state_tx.send(SessionState::Streaming);

        let (command_tx, commands) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            transport,
            ctx: ctx.clone(),
            reconnect_interval: config.reconnect_interval(),
            state_tx,
            commands,
            cancel: cancel.clone(),
        };
        let task_handle = tokio::spawn(supervisor.run(true));

        Ok(Self {
            config,
            ctx,
            state_rx,
            command_tx,
            cancel,
            task_handle: Some(task_handle),
        })
    }

    pub fn id(&self) -> &ControllerId {
        &self.ctx.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// The session's device-state cache
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.ctx.cache
    }

    /// Current state of one device
    pub fn get(&self, address: &DeviceAddress) -> Option<DeviceState> {
        self.ctx.cache.get(address)
    }

    /// The notifier this session publishes to
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.ctx.notifier
    }

    /// Subscribe to changes of one device on this controller
    pub fn subscribe(&self, address: DeviceAddress) -> Subscription {
        self.ctx
            .notifier
            .subscribe(NotificationKey::new(self.ctx.id.clone(), address))
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Whether the background task is still alive
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Set the state of a device
    ///
    /// `value` is a scalar such as `"1"` or a record such as
    /// `{"pwm_duty": "50"}`. Fails with [`EvokError::NotConnected`] while the
    /// controller is unreachable; commands are never queued across a
    /// reconnect.
    pub async fn send(&self, address: DeviceAddress, value: impl Into<Value>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let command = Command {
            request: Request::set(address, value),
            reply,
        };

        self.command_tx
            .send(command)
            .await
            .map_err(|_| EvokError::NotConnected)?;

        match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EvokError::ConnectionClosed),
            Err(_) => Err(EvokError::Timeout),
        }
    }

    /// Stop the background task and close the connection
    ///
    /// The cache keeps its last contents.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            if timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("UniPi session '{}' did not stop in time", self.ctx.id);
            }
        }
    }
}

impl Drop for ControllerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
