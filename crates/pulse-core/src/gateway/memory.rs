//! In-process gateway for tests
//!
//! [`MemoryGateway`] implements all four gateway ports against plain
//! in-memory tables. It reproduces the backend behaviors the client
//! depends on: hydrated author snapshots on change events, the stored
//! `like_count` aggregate (updated on every like mutation, then
//! announced as a post UPDATE — the analog of a database trigger),
//! comment cascade on post deletion, and username uniqueness.
//!
//! Test hooks:
//! - [`MemoryGateway::fail_next`] queues an error returned by the next
//!   store or upload call, for rollback and retry paths.
//!   [`MemoryGateway::fail_after`] skips a number of calls first, to
//!   fail one step of a multi-call flow.
//! - [`MemoryGateway::delay_next`] delays the next store or upload
//!   call, for racing an in-flight request against teardown.
//! - [`MemoryGateway::lapse_subscriptions`] pushes
//!   [`ChannelMessage::Lapsed`] into every open subscription,
//!   simulating a transport drop-and-resume.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{
    AuthChange, AuthGateway, AuthSession, ChangeEvent, ChangeFeed, ChannelMessage, FeedStore,
    MediaStore, Subscription, SUBSCRIPTION_CAPACITY,
};
use crate::error::{FeedError, FeedResult};
use crate::types::{
    now_ms, valid_username, AuthorSnapshot, Comment, CommentId, FeedEntity, LikeMark, NewComment,
    NewPost, Post, PostId, Profile, ProfileUpdate, UserId, MAX_CONTENT_LEN,
};

/// Capacity for the auth-change broadcast
const AUTH_CHANNEL_CAPACITY: usize = 64;

struct Credential {
    user_id: UserId,
    password: String,
}

struct StoredObject {
    #[allow(dead_code)]
    content_type: String,
    bytes: Bytes,
}

struct PostSub {
    /// Deliver only this author's posts when set
    author: Option<UserId>,
    tx: mpsc::Sender<ChannelMessage<Post>>,
    /// An event was lost to a full buffer; the next delivery becomes a
    /// lapse marker so the consumer resyncs instead of diverging
    lapsed: bool,
}

struct CommentSub {
    post_id: PostId,
    tx: mpsc::Sender<ChannelMessage<Comment>>,
    lapsed: bool,
}

/// Deliver one change into a subscription buffer, honoring a pending
/// lapse. Returns `false` once the receiver is gone.
fn deliver<T: FeedEntity>(
    tx: &mpsc::Sender<ChannelMessage<T>>,
    lapsed: &mut bool,
    event: &ChangeEvent<T>,
) -> bool {
    use mpsc::error::TrySendError;

    if *lapsed {
        // The consumer already missed at least one event and must
        // resync from a snapshot; that snapshot covers this event too,
        // so only the lapse marker goes out.
        return match tx.try_send(ChannelMessage::Lapsed) {
            Ok(()) => {
                *lapsed = false;
                true
            }
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        };
    }
    match tx.try_send(ChannelMessage::Change(event.clone())) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            // The event is lost; flag the gap rather than leaving the
            // consumer silently behind.
            *lapsed = true;
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Push a lapse marker, deferring it when the buffer is full.
fn mark_lapsed<T: FeedEntity>(tx: &mpsc::Sender<ChannelMessage<T>>, lapsed: &mut bool) -> bool {
    use mpsc::error::TrySendError;

    match tx.try_send(ChannelMessage::Lapsed) {
        Ok(()) => {
            *lapsed = false;
            true
        }
        Err(TrySendError::Full(_)) => {
            *lapsed = true;
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[derive(Default)]
struct State {
    credentials: HashMap<String, Credential>,
    session: Option<AuthSession>,
    profiles: HashMap<UserId, Profile>,
    posts: HashMap<PostId, Post>,
    comments: HashMap<CommentId, Comment>,
    likes: HashSet<LikeMark>,
    objects: HashMap<String, StoredObject>,
    post_subs: Vec<PostSub>,
    comment_subs: Vec<CommentSub>,
    injected_failures: VecDeque<Option<FeedError>>,
    injected_delays: VecDeque<std::time::Duration>,
    /// Last issued timestamp, kept strictly increasing so rows created
    /// back-to-back still have a total creation order
    last_ts: i64,
}

impl State {
    fn next_ts(&mut self) -> i64 {
        let ts = now_ms().max(self.last_ts + 1);
        self.last_ts = ts;
        ts
    }

    fn take_injected(&mut self) -> FeedResult<()> {
        match self.injected_failures.pop_front() {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn snapshot_of(&self, id: UserId) -> FeedResult<AuthorSnapshot> {
        let profile = self
            .profiles
            .get(&id)
            .ok_or_else(|| FeedError::not_found("Profile", id))?;
        Ok(AuthorSnapshot {
            username: profile.username.clone(),
            display_name: profile.display_name.clone(),
            avatar_url: profile.avatar_url.clone(),
        })
    }

    fn emit_post(&mut self, row_author: UserId, event: ChangeEvent<Post>) {
        // Subscriptions whose receiver is gone are dropped here.
        self.post_subs.retain_mut(|sub| {
            if let Some(author) = sub.author {
                if author != row_author {
                    return true;
                }
            }
            deliver(&sub.tx, &mut sub.lapsed, &event)
        });
    }

    fn emit_comment(&mut self, post_id: PostId, event: ChangeEvent<Comment>) {
        self.comment_subs.retain_mut(|sub| {
            if sub.post_id != post_id {
                return true;
            }
            deliver(&sub.tx, &mut sub.lapsed, &event)
        });
    }

    fn generate_username(&self, email: &str) -> String {
        let base: String = email
            .split('@')
            .next()
            .unwrap_or("member")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let base = if base.is_empty() {
            "member".to_string()
        } else {
            base.to_lowercase()
        };

        let taken: HashSet<&str> = self.profiles.values().map(|p| p.username.as_str()).collect();
        if !taken.contains(base.as_str()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}{}", base, n);
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn validate_content(content: &str) -> FeedResult<()> {
    if content.trim().is_empty() {
        return Err(FeedError::validation("content", "cannot be empty"));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(FeedError::validation(
            "content",
            format!("must be at most {} characters", MAX_CONTENT_LEN),
        ));
    }
    Ok(())
}

/// In-memory implementation of the full [`super::Gateway`] surface
pub struct MemoryGateway {
    state: Arc<RwLock<State>>,
    auth_tx: broadcast::Sender<AuthChange>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create an empty gateway with no accounts or rows
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            auth_tx,
        }
    }

    /// Register an account and its profile without signing in.
    ///
    /// Test setup helper: lets a suite create several identities and
    /// author rows for them directly through [`FeedStore`].
    pub fn seed_user(&self, email: &str, password: &str, username: &str) -> UserId {
        let mut state = self.state.write();
        let user_id = UserId::new();
        state.credentials.insert(
            email.to_string(),
            Credential {
                user_id,
                password: password.to_string(),
            },
        );
        let created_at = state.next_ts();
        state.profiles.insert(
            user_id,
            Profile {
                id: user_id,
                username: username.to_string(),
                display_name: username.to_string(),
                bio: String::new(),
                favorite_workout: String::new(),
                avatar_url: None,
                created_at,
            },
        );
        user_id
    }

    /// Queue an error for the next store or upload call
    pub fn fail_next(&self, err: FeedError) {
        self.state.write().injected_failures.push_back(Some(err));
    }

    /// Queue an error that fires after `skip` store or upload calls
    /// pass through, for tests failing one step of a multi-call flow
    pub fn fail_after(&self, skip: usize, err: FeedError) {
        let mut state = self.state.write();
        for _ in 0..skip {
            state.injected_failures.push_back(None);
        }
        state.injected_failures.push_back(Some(err));
    }

    /// Queue a delay before the next store or upload call executes,
    /// for tests racing an in-flight request against screen teardown
    pub fn delay_next(&self, delay: std::time::Duration) {
        self.state.write().injected_delays.push_back(delay);
    }

    /// Sleep out a queued delay. Taken before the state lock so the
    /// gateway stays usable while the delayed call is pending.
    async fn injected_delay(&self) {
        let delay = self.state.write().injected_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Simulate a transport drop-and-resume on every open subscription
    pub fn lapse_subscriptions(&self) {
        let mut state = self.state.write();
        state
            .post_subs
            .retain_mut(|sub| mark_lapsed(&sub.tx, &mut sub.lapsed));
        state
            .comment_subs
            .retain_mut(|sub| mark_lapsed(&sub.tx, &mut sub.lapsed));
    }

    /// Number of open post subscriptions (test observability)
    pub fn post_subscriber_count(&self) -> usize {
        self.state.read().post_subs.len()
    }

    /// Stored object bytes, if present (test observability)
    pub fn object_bytes(&self, bucket: &str, path: &str) -> Option<Bytes> {
        self.state
            .read()
            .objects
            .get(&format!("{}/{}", bucket, path))
            .map(|o| o.bytes.clone())
    }

    fn sorted_desc(mut rows: Vec<Post>) -> Vec<Post> {
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl FeedStore for MemoryGateway {
    async fn list_posts(&self) -> FeedResult<Vec<Post>> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        Ok(Self::sorted_desc(state.posts.values().cloned().collect()))
    }

    async fn get_post(&self, id: PostId) -> FeedResult<Post> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        state
            .posts
            .get(&id)
            .cloned()
            .ok_or_else(|| FeedError::not_found("Post", id))
    }

    async fn posts_by_author(&self, author: UserId) -> FeedResult<Vec<Post>> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        Ok(Self::sorted_desc(
            state
                .posts
                .values()
                .filter(|p| p.author_id == author)
                .cloned()
                .collect(),
        ))
    }

    async fn create_post(&self, draft: NewPost) -> FeedResult<Post> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        validate_content(&draft.content)?;

        let author = state.snapshot_of(draft.author_id)?;
        let post = Post {
            id: PostId::new(),
            author_id: draft.author_id,
            content: draft.content.trim().to_string(),
            image_url: draft.image_url,
            created_at: state.next_ts(),
            like_count: 0,
            author,
        };
        state.posts.insert(post.id, post.clone());
        debug!(post_id = %post.id, "Post created");
        state.emit_post(post.author_id, ChangeEvent::Insert { new: post.clone() });
        Ok(post)
    }

    async fn delete_post(&self, id: PostId) -> FeedResult<()> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;

        let post = state
            .posts
            .remove(&id)
            .ok_or_else(|| FeedError::not_found("Post", id))?;

        // Cascade: comments and like marks go with the post.
        let doomed: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == id)
            .cloned()
            .collect();
        for comment in doomed {
            state.comments.remove(&comment.id);
            state.emit_comment(id, ChangeEvent::Delete { id: comment.id });
        }
        state.likes.retain(|mark| mark.post_id != id);

        debug!(post_id = %id, "Post deleted");
        state.emit_post(post.author_id, ChangeEvent::Delete { id });
        Ok(())
    }

    async fn list_comments(&self, post_id: PostId) -> FeedResult<Vec<Comment>> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        let mut rows: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create_comment(&self, draft: NewComment) -> FeedResult<Comment> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        validate_content(&draft.content)?;

        if !state.posts.contains_key(&draft.post_id) {
            return Err(FeedError::not_found("Post", draft.post_id));
        }
        let author = state.snapshot_of(draft.author_id)?;
        let comment = Comment {
            id: CommentId::new(),
            post_id: draft.post_id,
            author_id: draft.author_id,
            content: draft.content.trim().to_string(),
            image_url: draft.image_url,
            created_at: state.next_ts(),
            author,
        };
        state.comments.insert(comment.id, comment.clone());
        state.emit_comment(
            comment.post_id,
            ChangeEvent::Insert {
                new: comment.clone(),
            },
        );
        Ok(comment)
    }

    async fn get_profile(&self, id: UserId) -> FeedResult<Profile> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        state
            .profiles
            .get(&id)
            .cloned()
            .ok_or_else(|| FeedError::not_found("Profile", id))
    }

    async fn username_taken(&self, username: &str) -> FeedResult<bool> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        Ok(state.profiles.values().any(|p| p.username == username))
    }

    async fn update_profile(&self, update: ProfileUpdate) -> FeedResult<Profile> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;

        if !valid_username(&update.username) {
            return Err(FeedError::validation(
                "username",
                "only letters, numbers, and underscores are allowed",
            ));
        }
        let clash = state
            .profiles
            .values()
            .any(|p| p.username == update.username && p.id != update.user_id);
        if clash {
            return Err(FeedError::validation("username", "already taken"));
        }

        let profile = state
            .profiles
            .get_mut(&update.user_id)
            .ok_or_else(|| FeedError::not_found("Profile", update.user_id))?;
        profile.username = update.username;
        profile.display_name = update.display_name;
        profile.bio = update.bio;
        profile.favorite_workout = update.favorite_workout;
        profile.avatar_url = update.avatar_url;
        // Author snapshots embedded in existing posts and comments are
        // deliberately left untouched; clients re-fetch to pick this up.
        Ok(profile.clone())
    }

    async fn top_profiles(&self, limit: usize) -> FeedResult<Vec<Profile>> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        let mut rows: Vec<Profile> = state.profiles.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn liked_posts(&self, user: UserId) -> FeedResult<HashSet<PostId>> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        Ok(state
            .likes
            .iter()
            .filter(|mark| mark.user_id == user)
            .map(|mark| mark.post_id)
            .collect())
    }

    async fn insert_like(&self, mark: LikeMark) -> FeedResult<()> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;

        if !state.posts.contains_key(&mark.post_id) {
            return Err(FeedError::not_found("Post", mark.post_id));
        }
        if !state.likes.insert(mark) {
            // At-least-once clients may retry; membership is binary.
            return Ok(());
        }
        let updated = {
            let post = state
                .posts
                .get_mut(&mark.post_id)
                .expect("post existence checked above");
            post.like_count += 1;
            post.clone()
        };
        state.emit_post(updated.author_id, ChangeEvent::Update { new: updated });
        Ok(())
    }

    async fn delete_like(&self, mark: LikeMark) -> FeedResult<()> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;

        if !state.likes.remove(&mark) {
            return Ok(());
        }
        let updated = match state.posts.get_mut(&mark.post_id) {
            Some(post) => {
                post.like_count = (post.like_count - 1).max(0);
                post.clone()
            }
            // Post deleted concurrently; nothing to announce.
            None => return Ok(()),
        };
        state.emit_post(updated.author_id, ChangeEvent::Update { new: updated });
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MemoryGateway {
    async fn subscribe_posts(&self) -> FeedResult<Subscription<Post>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.state.write().post_subs.push(PostSub {
            author: None,
            tx,
            lapsed: false,
        });
        Ok(Subscription::from_receiver(rx))
    }

    async fn subscribe_posts_by(&self, author: UserId) -> FeedResult<Subscription<Post>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.state.write().post_subs.push(PostSub {
            author: Some(author),
            tx,
            lapsed: false,
        });
        Ok(Subscription::from_receiver(rx))
    }

    async fn subscribe_comments(&self, post_id: PostId) -> FeedResult<Subscription<Comment>> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        self.state.write().comment_subs.push(CommentSub {
            post_id,
            tx,
            lapsed: false,
        });
        Ok(Subscription::from_receiver(rx))
    }
}

#[async_trait]
impl MediaStore for MemoryGateway {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> FeedResult<String> {
        self.injected_delay().await;
        let mut state = self.state.write();
        state.take_injected()?;
        if bytes.is_empty() {
            return Err(FeedError::Upload("empty payload".to_string()));
        }
        let key = format!("{}/{}", bucket, path);
        state.objects.insert(
            key,
            StoredObject {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }
}

#[async_trait]
impl AuthGateway for MemoryGateway {
    async fn session(&self) -> FeedResult<Option<AuthSession>> {
        Ok(self.state.read().session.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> FeedResult<AuthSession> {
        let session = {
            let mut state = self.state.write();
            let cred = state
                .credentials
                .get(email)
                .filter(|c| c.password == password)
                .ok_or_else(|| {
                    FeedError::validation("credentials", "invalid email or password")
                })?;
            let session = AuthSession {
                user_id: cred.user_id,
                email: email.to_string(),
            };
            state.session = Some(session.clone());
            session
        };
        debug!(user_id = %session.user_id, "Signed in");
        let _ = self.auth_tx.send(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> FeedResult<AuthSession> {
        let session = {
            let mut state = self.state.write();
            if !email.contains('@') {
                return Err(FeedError::validation("email", "not a valid address"));
            }
            if password.len() < 6 {
                return Err(FeedError::validation(
                    "password",
                    "must be at least 6 characters",
                ));
            }
            if state.credentials.contains_key(email) {
                return Err(FeedError::validation("email", "already registered"));
            }

            let user_id = UserId::new();
            let username = state.generate_username(email);
            state.credentials.insert(
                email.to_string(),
                Credential {
                    user_id,
                    password: password.to_string(),
                },
            );
            let created_at = state.next_ts();
            state.profiles.insert(
                user_id,
                Profile {
                    id: user_id,
                    username,
                    display_name: display_name.to_string(),
                    bio: String::new(),
                    favorite_workout: String::new(),
                    avatar_url: None,
                    created_at,
                },
            );
            let session = AuthSession {
                user_id,
                email: email.to_string(),
            };
            state.session = Some(session.clone());
            session
        };
        let _ = self.auth_tx.send(AuthChange::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> FeedResult<()> {
        self.state.write().session = None;
        let _ = self.auth_tx.send(AuthChange::SignedOut);
        Ok(())
    }

    fn auth_changes(&self) -> broadcast::Receiver<AuthChange> {
        self.auth_tx.subscribe()
    }
}
