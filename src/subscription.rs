use crate::error::{EvokError, Result};
use crate::types::{ControllerId, DeviceAddress};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

const KEY_CHANNEL_CAPACITY: usize = 16;
const ALL_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out key: one device on one controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationKey {
    pub controller: ControllerId,
    pub address: DeviceAddress,
}

impl NotificationKey {
    pub fn new(controller: ControllerId, address: DeviceAddress) -> Self {
        Self {
            controller,
            address,
        }
    }
}

impl fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.controller, self.address)
    }
}

/// Signal that the cached state behind `key` changed
///
/// Carries no state: receivers read the session's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub key: NotificationKey,
}

struct NotifierInner {
    channels: Mutex<HashMap<NotificationKey, broadcast::Sender<ChangeNotification>>>,
    all_tx: broadcast::Sender<ChangeNotification>,
}

/// Publish/subscribe registry for change notifications
///
/// Create one per application and hand clones to every session and observer.
/// Delivery is best-effort to whoever is subscribed when a change is emitted.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (all_tx, _) = broadcast::channel(ALL_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(NotifierInner {
                channels: Mutex::new(HashMap::new()),
                all_tx,
            }),
        }
    }

    fn channels(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<NotificationKey, broadcast::Sender<ChangeNotification>>>
    {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to changes of one device
    pub fn subscribe(&self, key: NotificationKey) -> Subscription {
        let rx = self
            .channels()
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(KEY_CHANNEL_CAPACITY).0)
            .subscribe();
        Subscription::new(rx, Some(key))
    }

    /// Subscribe to every change on every controller
    pub fn subscribe_all(&self) -> Subscription {
        Subscription::new(self.inner.all_tx.subscribe(), None)
    }

    /// Number of live subscriptions for one key
    pub fn subscriber_count(&self, key: &NotificationKey) -> usize {
        self.channels()
            .get(key)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Emit a notification for `key`
    pub fn notify(&self, key: &NotificationKey) {
        let notification = ChangeNotification { key: key.clone() };

        {
            let mut channels = self.channels();
            if let Some(tx) = channels.get(key) {
                if tx.send(notification.clone()).is_err() {
                    // Every subscriber is gone
                    channels.remove(key);
                }
            }
        }

        // Ignore send errors -- just means nobody listens to everything
        let _ = self.inner.all_tx.send(notification);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("keys", &self.channels().len())
            .finish()
    }
}

/// Receiver for change notifications
///
/// Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeNotification>,
    key: Option<NotificationKey>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<ChangeNotification>, key: Option<NotificationKey>) -> Self {
        Self { rx, key }
    }

    /// Receive the next notification
    ///
    /// A per-device subscription that fell behind gets a single notification
    /// for the missed changes, since re-reading the cache covers all of them.
    pub async fn recv(&mut self) -> Result<ChangeNotification> {
        match self.rx.recv().await {
            Ok(notification) => Ok(notification),
            Err(broadcast::error::RecvError::Closed) => Err(EvokError::ConnectionClosed),
            Err(broadcast::error::RecvError::Lagged(n)) => self.coalesce(n),
        }
    }

    /// Try to receive a notification without waiting
    ///
    /// Returns `None` if nothing is pending.
    pub fn try_recv(&mut self) -> Result<Option<ChangeNotification>> {
        match self.rx.try_recv() {
            Ok(notification) => Ok(Some(notification)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(EvokError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => self.coalesce(n).map(Some),
        }
    }

    fn coalesce(&self, missed: u64) -> Result<ChangeNotification> {
        match &self.key {
            Some(key) => {
                tracing::trace!(%key, missed, "Coalescing lagged notifications");
                Ok(ChangeNotification { key: key.clone() })
            }
            None => Err(EvokError::ChannelError(format!(
                "Lagged by {} messages",
                missed
            ))),
        }
    }
}
