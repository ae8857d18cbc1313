//! Remote Data Gateway boundary
//!
//! The hosted backend is an opaque collaborator reached through four
//! ports: row queries and mutations ([`FeedStore`]), change-event
//! subscriptions ([`ChangeFeed`]), object storage ([`MediaStore`]), and
//! session auth ([`AuthGateway`]). No wire format is assumed here; the
//! in-process [`memory::MemoryGateway`] implements all four for tests.
//!
//! ## Delivery model
//!
//! A [`Subscription`] delivers [`ChannelMessage`]s for one logical
//! channel (a table, optionally filtered). Within a channel, change
//! events arrive in server-commit order, at least once while the
//! transport is connected. Nothing is guaranteed across channels. When
//! the transport drops and resumes, the gateway emits
//! [`ChannelMessage::Lapsed`]: events in the disconnect window are
//! unrecoverable and the consumer must re-snapshot before trusting
//! incremental delivery again.

pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use tokio::sync::{broadcast, mpsc};

use crate::error::FeedResult;
use crate::types::{
    Comment, FeedEntity, LikeMark, NewComment, NewPost, Post, PostId, Profile, ProfileUpdate,
    UserId,
};

/// Default capacity for subscription delivery channels
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// A row-level change on one channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<T: FeedEntity> {
    /// A new row was committed. Payloads arrive fully hydrated (author
    /// snapshot included); resolving joins is the gateway's concern.
    Insert { new: T },
    /// An existing row changed
    Update { new: T },
    /// A row was removed
    Delete { id: T::Id },
}

/// One message on a subscription channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage<T: FeedEntity> {
    /// An incremental change to apply
    Change(ChangeEvent<T>),
    /// The transport dropped and resumed; events may have been missed
    /// and the consumer must reload a snapshot before continuing
    Lapsed,
}

/// Receiving half of a change-event subscription.
///
/// Dropping the subscription closes the channel; the gateway stops
/// delivering into it.
pub struct Subscription<T: FeedEntity> {
    rx: mpsc::Receiver<ChannelMessage<T>>,
}

impl<T: FeedEntity> Subscription<T> {
    /// Build a subscription from a raw receiver (used by gateway
    /// implementations)
    pub fn from_receiver(rx: mpsc::Receiver<ChannelMessage<T>>) -> Self {
        Self { rx }
    }

    /// Receive the next message, or `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<ChannelMessage<T>> {
        self.rx.recv().await
    }
}

/// Row queries and mutations against the backend data store
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// All posts, newest first
    async fn list_posts(&self) -> FeedResult<Vec<Post>>;

    /// A single post; fails with `NotFound` when the row is missing
    async fn get_post(&self, id: PostId) -> FeedResult<Post>;

    /// Posts by one author, newest first
    async fn posts_by_author(&self, author: UserId) -> FeedResult<Vec<Post>>;

    /// Create a post; the backend fills id, timestamp, aggregate, and
    /// author snapshot
    async fn create_post(&self, draft: NewPost) -> FeedResult<Post>;

    /// Delete a post; comments cascade on the backend side
    async fn delete_post(&self, id: PostId) -> FeedResult<()>;

    /// Comments on one post, newest first
    async fn list_comments(&self, post_id: PostId) -> FeedResult<Vec<Comment>>;

    /// Create a comment on a post
    async fn create_comment(&self, draft: NewComment) -> FeedResult<Comment>;

    /// A single profile; fails with `NotFound` when missing
    async fn get_profile(&self, id: UserId) -> FeedResult<Profile>;

    /// Whether a username is already claimed
    async fn username_taken(&self, username: &str) -> FeedResult<bool>;

    /// Update the caller's profile row
    async fn update_profile(&self, update: ProfileUpdate) -> FeedResult<Profile>;

    /// Most recently created profiles, for the leaderboard
    async fn top_profiles(&self, limit: usize) -> FeedResult<Vec<Profile>>;

    /// Ids of the posts the user has liked
    async fn liked_posts(&self, user: UserId) -> FeedResult<HashSet<PostId>>;

    /// Record a like; inserting an existing mark is a no-op
    async fn insert_like(&self, mark: LikeMark) -> FeedResult<()>;

    /// Remove a like; removing an absent mark is a no-op
    async fn delete_like(&self, mark: LikeMark) -> FeedResult<()>;
}

/// Change-event subscriptions, one logical channel per call
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// All post changes
    async fn subscribe_posts(&self) -> FeedResult<Subscription<Post>>;

    /// Post changes filtered to one author
    async fn subscribe_posts_by(&self, author: UserId) -> FeedResult<Subscription<Post>>;

    /// Comment changes filtered to one post
    async fn subscribe_comments(&self, post_id: PostId) -> FeedResult<Subscription<Comment>>;
}

/// Object storage for post images and avatars
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store bytes and return the public URL
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> FeedResult<String>;

    /// Public URL for an object path (no existence check)
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: UserId,
    pub email: String,
}

/// Identity transitions, broadcast to every listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChange {
    SignedIn(AuthSession),
    SignedOut,
}

/// Session-based authentication. Token refresh is the backend's
/// concern; the client only observes session transitions.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// The current session, if any
    async fn session(&self) -> FeedResult<Option<AuthSession>>;

    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &str) -> FeedResult<AuthSession>;

    /// Sign up, creating the profile row with a generated unique
    /// username derived from the email local part
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> FeedResult<AuthSession>;

    /// End the current session
    async fn sign_out(&self) -> FeedResult<()>;

    /// Subscribe to identity transitions
    fn auth_changes(&self) -> broadcast::Receiver<AuthChange>;
}

/// The full gateway surface a screen controller needs.
///
/// Blanket-implemented for anything providing all four ports.
pub trait Gateway: FeedStore + ChangeFeed + MediaStore + AuthGateway {}

impl<T: FeedStore + ChangeFeed + MediaStore + AuthGateway> Gateway for T {}
