//! # Pulse Core
//!
//! Client core for a real-time social feed: local list reconciliation,
//! optimistic like mutations, and subscription channel lifecycle over
//! an opaque remote gateway.
//!
//! ## Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │ Screens (feed / detail / compose / profile / ranking)  │
//! └──────┬────────────────┬──────────────────┬─────────────┘
//!        │                │                  │
//! ┌──────▼──────┐  ┌──────▼───────┐  ┌───────▼──────────┐
//! │ Reconcilers │  │ LikeCoord.   │  │ ChannelManager   │
//! │ ordered,    │  │ optimistic,  │  │ one task per key │
//! │ deduped     │  │ serialized   │  │ lapse → resync   │
//! └──────┬──────┘  └──────┬───────┘  └───────┬──────────┘
//!        │                │                  │
//! ┌──────▼────────────────▼──────────────────▼─────────────┐
//! │ Gateway ports: FeedStore / ChangeFeed / MediaStore /   │
//! │ AuthGateway  (in-memory implementation for tests)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The reconcilers keep every visible list ordered newest-first,
//! deduplicated, and idempotent under re-delivered events. The like
//! coordinator applies toggles to local state instantly and reconciles
//! with the store in the background, rolling back exactly on failure.
//! The channel manager owns one background task per subscription key
//! and reloads a snapshot whenever the transport lapses.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pulse_core::channels::ChannelManager;
//! use pulse_core::gateway::memory::MemoryGateway;
//! use pulse_core::screens::{FeedScreen, ScreenContext};
//! use pulse_core::session::SessionManager;
//!
//! let gateway = Arc::new(MemoryGateway::new());
//! let session = Arc::new(SessionManager::new(gateway.clone(), gateway.clone()));
//! session.start().await?;
//! session.sign_in("ada@example.com", "hunter22").await?;
//!
//! let ctx = ScreenContext::new(gateway, session, Arc::new(ChannelManager::new()));
//! let feed = FeedScreen::new(ctx);
//! feed.mount().await?;
//! for post in feed.posts() {
//!     println!("{}: {}", post.author.username, post.content);
//! }
//! ```

pub mod channels;
pub mod error;
pub mod gateway;
pub mod likes;
pub mod reconciler;
pub mod screens;
pub mod session;
pub mod timefmt;
pub mod types;

pub use channels::{ChannelEvent, ChannelKey, ChannelManager, ChannelStatus};
pub use error::{FeedError, FeedResult};
pub use likes::LikeCoordinator;
pub use reconciler::ListReconciler;
pub use screens::{
    ComposeScreen, FeedScreen, LeaderboardScreen, PostDetailScreen, ProfileScreen, ScreenContext,
};
pub use session::SessionManager;
pub use types::{Comment, CommentId, Post, PostId, Profile, UserId};
