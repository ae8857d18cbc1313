//! Screen controllers
//!
//! One controller per screen of the app. Each owns the screen's local
//! state (reconcilers, load phases, user notices), wires its live
//! channels on mount, and tears them down exactly on unmount. The
//! controllers hold no rendering concerns; a UI layer polls their
//! accessors and calls their operations.

mod compose;
mod feed;
mod leaderboard;
mod post_detail;
mod profile;

pub use compose::ComposeScreen;
pub use feed::FeedScreen;
pub use leaderboard::{LeaderboardScreen, LoadPhase};
pub use post_detail::{DetailPhase, PostDetailScreen};
pub use profile::ProfileScreen;

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channels::ChannelManager;
use crate::gateway::Gateway;
use crate::session::SessionManager;

/// Shared handles every screen receives at construction
#[derive(Clone)]
pub struct ScreenContext {
    pub gateway: Arc<dyn Gateway>,
    pub session: Arc<SessionManager>,
    pub channels: Arc<ChannelManager>,
}

impl ScreenContext {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        session: Arc<SessionManager>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self {
            gateway,
            session,
            channels,
        }
    }
}

/// An image the user picked for upload
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub bytes: Bytes,
    pub content_type: String,
    /// File extension without the dot, used to build storage paths
    pub extension: String,
}

/// Transient user-facing messages a screen has queued.
///
/// Failed background operations (a like that rolled back, a lapsed
/// channel that could not resync) land here instead of panicking or
/// vanishing; the UI drains them into toasts.
#[derive(Default)]
pub(crate) struct Notices {
    queue: Mutex<VecDeque<String>>,
}

impl Notices {
    pub(crate) fn push(&self, message: impl Into<String>) {
        self.queue.lock().push_back(message.into());
    }

    pub(crate) fn drain(&self) -> Vec<String> {
        self.queue.lock().drain(..).collect()
    }
}
