//! Core entity types for the Pulse client
//!
//! Entities mirror the backend rows the client renders: posts, comments,
//! profiles, and like marks. Posts and comments embed a denormalized
//! [`AuthorSnapshot`] so a list row renders without a second lookup.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Maximum length of post and comment content, in characters
pub const MAX_CONTENT_LEN: usize = 280;

/// Current unix timestamp in milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Create a new id with the current timestamp
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse from string representation
            pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
                Ok(Self(Ulid::from_string(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }
    };
}

ulid_id!(
    /// Unique identifier for a post
    PostId,
    "post"
);
ulid_id!(
    /// Unique identifier for a comment
    CommentId,
    "comment"
);
ulid_id!(
    /// Unique identifier for a user (the authenticated identity)
    UserId,
    "user"
);

/// Denormalized author info embedded in post and comment rows.
///
/// A snapshot taken at row creation; an independent profile update does
/// not rewrite rows already materialized in a screen's list (the defined
/// recovery path is a snapshot refresh).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A post in the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Unique identifier
    pub id: PostId,
    /// Author's user id
    pub author_id: UserId,
    /// Post body, at most [`MAX_CONTENT_LEN`] characters
    pub content: String,
    /// Public URL of an attached image, if any
    pub image_url: Option<String>,
    /// Unix timestamp in milliseconds; the feed ordering key, immutable
    pub created_at: i64,
    /// Server-maintained like aggregate; the client only ever applies
    /// an optimistic ±1 on top of it
    pub like_count: i64,
    /// Author info at row creation
    pub author: AuthorSnapshot,
}

/// A comment on a post
///
/// Immutable once created in this client's scope; there is no edit or
/// delete flow for comments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    /// The post this comment belongs to
    pub post_id: PostId,
    pub author_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    pub author: AuthorSnapshot,
}

/// A user profile, one per authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Equal to the authenticated user id
    pub id: UserId,
    /// Unique handle, letters/digits/underscores only
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub favorite_workout: String,
    pub avatar_url: Option<String>,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

/// Membership record: the user has liked the post. No payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LikeMark {
    pub post_id: PostId,
    pub user_id: UserId,
}

/// Draft for creating a post
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
}

/// Draft for creating a comment
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: UserId,
    pub content: String,
    pub image_url: Option<String>,
}

/// Field set for a profile update
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub favorite_workout: String,
    pub avatar_url: Option<String>,
}

/// Check a username against the allowed shape: non-empty, letters,
/// digits, and underscores only.
pub fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Seam between the reconciler and the entities it manages.
///
/// `created_at` is the ordering key and must never change after
/// creation; `absorb` merges the mutable fields of an UPDATE payload
/// while leaving identity and ordering untouched.
pub trait FeedEntity: Clone + Send + Sync + 'static {
    /// Id type used for de-duplication and removal
    type Id: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync;

    /// The entity's unique id
    fn entity_id(&self) -> Self::Id;

    /// Creation timestamp in unix milliseconds (the ordering key)
    fn created_at(&self) -> i64;

    /// Merge the mutable fields of an incoming UPDATE payload
    fn absorb(&mut self, incoming: Self);
}

impl FeedEntity for Post {
    type Id = PostId;

    fn entity_id(&self) -> PostId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn absorb(&mut self, incoming: Post) {
        // id, author_id, created_at, and the author snapshot are fixed
        // at creation; only the mutable columns move.
        self.content = incoming.content;
        self.image_url = incoming.image_url;
        self.like_count = incoming.like_count;
    }
}

impl FeedEntity for Comment {
    type Id = CommentId;

    fn entity_id(&self) -> CommentId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn absorb(&mut self, incoming: Comment) {
        self.content = incoming.content;
        self.image_url = incoming.image_url;
    }
}

impl FeedEntity for Profile {
    type Id = UserId;

    fn entity_id(&self) -> UserId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn absorb(&mut self, incoming: Profile) {
        self.username = incoming.username;
        self.display_name = incoming.display_name;
        self.bio = incoming.bio;
        self.favorite_workout = incoming.favorite_workout;
        self.avatar_url = incoming.avatar_url;
    }
}
