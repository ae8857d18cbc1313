//! Leaderboard screen
//!
//! The ten most recently created member profiles. Plain fetch-on-mount
//! with a retry path; no live channel, the list is refreshed
//! explicitly.

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::FeedResult;
use crate::types::Profile;

use super::ScreenContext;

/// Rows shown on the leaderboard
pub const LEADERBOARD_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Loading,
    Ready,
    Failed(String),
}

pub struct LeaderboardScreen {
    ctx: ScreenContext,
    entries: RwLock<Vec<Profile>>,
    phase: RwLock<LoadPhase>,
}

impl LeaderboardScreen {
    pub fn new(ctx: ScreenContext) -> Self {
        Self {
            ctx,
            entries: RwLock::new(Vec::new()),
            phase: RwLock::new(LoadPhase::Loading),
        }
    }

    /// Fetch the ranking. Also the retry path after a failure.
    pub async fn load(&self) -> FeedResult<()> {
        *self.phase.write() = LoadPhase::Loading;
        match self.ctx.gateway.top_profiles(LEADERBOARD_SIZE).await {
            Ok(entries) => {
                info!(count = entries.len(), "Leaderboard loaded");
                *self.entries.write() = entries;
                *self.phase.write() = LoadPhase::Ready;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "Leaderboard load failed");
                *self.phase.write() = LoadPhase::Failed(err.to_string());
                Err(err)
            }
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase.read().clone()
    }

    /// Listed profiles, newest member first
    pub fn entries(&self) -> Vec<Profile> {
        self.entries.read().clone()
    }
}
