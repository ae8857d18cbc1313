//! Subscription channel lifecycle management
//!
//! One background task per open channel routes incoming change events
//! into that screen's [`ListReconciler`]. The manager guarantees:
//!
//! - exactly one live subscription per [`ChannelKey`]; re-opening a key
//!   tears the previous task down first (the re-subscribe-with-a-new-
//!   filter case)
//! - teardown happens exactly once, and a closed channel's queued
//!   events can never reach a reconciler again
//! - after a transport lapse, a fresh snapshot is loaded before
//!   incremental delivery resumes, since events missed while
//!   disconnected are unrecoverable
//!
//! Status per channel and a broadcast of [`ChannelEvent`]s give the
//! presentation layer its re-render signal.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FeedResult;
use crate::gateway::{ChannelMessage, Subscription};
use crate::reconciler::ListReconciler;
use crate::types::FeedEntity;

/// Default capacity for the channel event broadcast
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stored snapshot re-fetch used to recover from a transport lapse
pub type SnapshotFn<T> = Box<dyn Fn() -> BoxFuture<'static, FeedResult<Vec<T>>> + Send + Sync>;

/// Identifier for a logical channel scope, e.g. `feed:posts` or
/// `detail:comments:<post_id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of one channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelStatus {
    /// Not open
    #[default]
    Idle,
    /// Receiving incremental events
    Live,
    /// Transport dropped; a snapshot re-fetch is in progress
    Lapsed,
    /// Terminal failure; reopening the channel is the recovery path
    Error(String),
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "Idle"),
            ChannelStatus::Live => write!(f, "Live"),
            ChannelStatus::Lapsed => write!(f, "Lapsed"),
            ChannelStatus::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// Events emitted by channel tasks
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// An incremental event changed the reconciler state
    Changed { key: ChannelKey },
    /// A post-lapse snapshot replaced the reconciler state
    Resynced { key: ChannelKey },
    /// The channel's status changed
    StatusChanged {
        key: ChannelKey,
        status: ChannelStatus,
    },
    /// The channel was closed by its owner
    Closed { key: ChannelKey },
    /// The channel failed
    Error { key: ChannelKey, message: String },
}

struct ChannelState {
    task: JoinHandle<()>,
    status: ChannelStatus,
}

type ChannelMap = Arc<RwLock<HashMap<ChannelKey, ChannelState>>>;

/// Manager for all of a client's open subscription channels
pub struct ChannelManager {
    channels: ChannelMap,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    /// Create a manager with no open channels
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to channel events. Multiple subscribers can exist;
    /// events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Current status for a key; `Idle` when the channel is not open
    pub fn status(&self, key: &ChannelKey) -> ChannelStatus {
        self.channels
            .read()
            .get(key)
            .map(|s| s.status.clone())
            .unwrap_or(ChannelStatus::Idle)
    }

    /// Whether a channel is open under this key
    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.channels.read().contains_key(key)
    }

    /// Number of open channels
    pub fn open_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Open a channel: spawn the routing task feeding `reconciler`
    /// from `subscription`.
    ///
    /// An existing channel under the same key is closed first, so a
    /// screen navigating to a different filter (say, another post's
    /// comments) can re-open its key without leaking the old task.
    pub fn open<T: FeedEntity>(
        &self,
        key: ChannelKey,
        subscription: Subscription<T>,
        reconciler: Arc<RwLock<ListReconciler<T>>>,
        snapshot: SnapshotFn<T>,
    ) {
        if self.is_open(&key) {
            debug!(%key, "Replacing existing channel");
            self.close(&key);
        }

        info!(%key, "Opening channel");
        let channels = self.channels.clone();
        let event_tx = self.event_tx.clone();
        let task_key = key.clone();

        // Register the entry under the lock before the task can run:
        // a subscription that terminates immediately would otherwise
        // report its status against a key that is not in the map yet.
        {
            let mut map = self.channels.write();
            let task = tokio::spawn(async move {
                Self::channel_task(
                    task_key,
                    subscription,
                    reconciler,
                    snapshot,
                    event_tx,
                    channels,
                )
                .await;
            });
            map.insert(
                key.clone(),
                ChannelState {
                    task,
                    status: ChannelStatus::Live,
                },
            );
        }
        let _ = self.event_tx.send(ChannelEvent::StatusChanged {
            key,
            status: ChannelStatus::Live,
        });
    }

    /// Close a channel. Returns `false` if no channel was open under
    /// this key. After this returns, events still queued on the old
    /// subscription can no longer affect any reconciler.
    pub fn close(&self, key: &ChannelKey) -> bool {
        let state = self.channels.write().remove(key);
        match state {
            Some(state) => {
                info!(%key, "Closing channel");
                state.task.abort();
                let _ = self.event_tx.send(ChannelEvent::Closed { key: key.clone() });
                let _ = self.event_tx.send(ChannelEvent::StatusChanged {
                    key: key.clone(),
                    status: ChannelStatus::Idle,
                });
                true
            }
            None => {
                debug!(%key, "Channel not open");
                false
            }
        }
    }

    /// Close every open channel
    pub fn shutdown(&self) {
        let keys: Vec<ChannelKey> = self.channels.read().keys().cloned().collect();
        for key in keys {
            self.close(&key);
        }
    }

    fn set_status(
        channels: &ChannelMap,
        key: &ChannelKey,
        status: ChannelStatus,
        event_tx: &broadcast::Sender<ChannelEvent>,
    ) {
        let mut channels = channels.write();
        if let Some(state) = channels.get_mut(key) {
            if state.status != status {
                state.status = status.clone();
                let _ = event_tx.send(ChannelEvent::StatusChanged {
                    key: key.clone(),
                    status,
                });
            }
        }
    }

    async fn channel_task<T: FeedEntity>(
        key: ChannelKey,
        mut subscription: Subscription<T>,
        reconciler: Arc<RwLock<ListReconciler<T>>>,
        snapshot: SnapshotFn<T>,
        event_tx: broadcast::Sender<ChannelEvent>,
        channels: ChannelMap,
    ) {
        debug!(%key, "Channel task started");

        loop {
            match subscription.recv().await {
                Some(ChannelMessage::Change(event)) => {
                    let changed = reconciler.write().apply(event);
                    if changed {
                        let _ = event_tx.send(ChannelEvent::Changed { key: key.clone() });
                    }
                }
                Some(ChannelMessage::Lapsed) => {
                    // Events during the disconnect window are gone for
                    // good; nothing incremental is trustworthy until a
                    // snapshot replaces the local state.
                    warn!(%key, "Transport lapsed, reloading snapshot");
                    Self::set_status(&channels, &key, ChannelStatus::Lapsed, &event_tx);

                    match snapshot().await {
                        Ok(items) => {
                            reconciler.write().load_snapshot(items);
                            let _ = event_tx.send(ChannelEvent::Resynced { key: key.clone() });
                            Self::set_status(&channels, &key, ChannelStatus::Live, &event_tx);
                        }
                        Err(err) => {
                            warn!(%key, %err, "Post-lapse snapshot failed");
                            let _ = event_tx.send(ChannelEvent::Error {
                                key: key.clone(),
                                message: err.to_string(),
                            });
                            Self::set_status(
                                &channels,
                                &key,
                                ChannelStatus::Error(err.to_string()),
                                &event_tx,
                            );
                            break;
                        }
                    }
                }
                None => {
                    warn!(%key, "Subscription closed by gateway");
                    let _ = event_tx.send(ChannelEvent::Error {
                        key: key.clone(),
                        message: "subscription closed unexpectedly".to_string(),
                    });
                    Self::set_status(
                        &channels,
                        &key,
                        ChannelStatus::Error("subscription closed".to_string()),
                        &event_tx,
                    );
                    break;
                }
            }
        }

        debug!(%key, "Channel task ended");
    }
}
