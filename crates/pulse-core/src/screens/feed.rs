//! Home feed screen
//!
//! Global post list, newest first, with live inserts/updates/deletes
//! and optimistic like toggles. Mount loads the snapshot and the
//! signed-in user's liked set, then opens the feed channel; unmount
//! tears the channel down and invalidates any load still in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channels::ChannelKey;
use crate::error::{FeedError, FeedResult};
use crate::gateway::AuthChange;
use crate::likes::LikeCoordinator;
use crate::reconciler::ListReconciler;
use crate::types::{Post, PostId};

use super::{Notices, ScreenContext};

const FEED_CHANNEL: &str = "feed:posts";

pub struct FeedScreen {
    ctx: ScreenContext,
    posts: Arc<RwLock<ListReconciler<Post>>>,
    likes: LikeCoordinator,
    notices: Arc<Notices>,
    /// Bumped on every mount/unmount; loads started under an older
    /// epoch discard their results instead of touching screen state.
    epoch: Arc<AtomicU64>,
    auth_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl FeedScreen {
    pub fn new(ctx: ScreenContext) -> Self {
        let posts = Arc::new(RwLock::new(ListReconciler::new()));
        let likes = LikeCoordinator::new(ctx.gateway.clone(), posts.clone());
        Self {
            ctx,
            posts,
            likes,
            notices: Arc::new(Notices::default()),
            epoch: Arc::new(AtomicU64::new(0)),
            auth_watcher: Mutex::new(None),
        }
    }

    fn channel_key() -> ChannelKey {
        ChannelKey::new(FEED_CHANNEL)
    }

    /// Load the feed and open its live channel.
    ///
    /// Requires a signed-in user; the feed is never shown anonymously.
    pub async fn mount(&self) -> FeedResult<()> {
        let user = self.ctx.session.current_user()?;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!(%user, "Mounting feed screen");

        let snapshot = self.ctx.gateway.list_posts().await?;
        let liked = self.ctx.gateway.liked_posts(user).await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Feed mount superseded, discarding loads");
            return Ok(());
        }
        self.posts.write().load_snapshot(snapshot);
        self.likes.load_membership(user, liked);

        let sub = self.ctx.gateway.subscribe_posts().await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Ok(());
        }
        let gateway = self.ctx.gateway.clone();
        self.ctx.channels.open(
            Self::channel_key(),
            sub,
            self.posts.clone(),
            Box::new(move || {
                let gateway = gateway.clone();
                Box::pin(async move { gateway.list_posts().await })
            }),
        );

        self.watch_identity();
        Ok(())
    }

    /// Tear down the channel and watcher; queued events and in-flight
    /// loads no longer reach this screen's state.
    pub fn unmount(&self) {
        info!("Unmounting feed screen");
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.ctx.channels.close(&Self::channel_key());
        if let Some(task) = self.auth_watcher.lock().take() {
            task.abort();
        }
    }

    /// Pull-to-refresh: reload the snapshot and liked set in place.
    pub async fn refresh(&self) -> FeedResult<()> {
        let user = self.ctx.session.current_user()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let snapshot = self.ctx.gateway.list_posts().await?;
        let liked = self.ctx.gateway.liked_posts(user).await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Feed refresh superseded, discarding");
            return Ok(());
        }
        self.posts.write().load_snapshot(snapshot);
        self.likes.load_membership(user, liked);
        Ok(())
    }

    /// Optimistic like toggle; a failed mutation rolls back and queues
    /// a notice instead of surfacing an error to the caller.
    pub async fn toggle_like(&self, post_id: PostId) {
        if let Err(err) = self.likes.toggle_like(post_id).await {
            warn!(%post_id, %err, "Like toggle failed");
            self.notices.push(format!("Couldn't update like: {}", err));
        }
    }

    /// Delete one of the signed-in user's own posts.
    pub async fn delete_post(&self, post_id: PostId) -> FeedResult<()> {
        let user = self.ctx.session.current_user()?;
        let owned = self
            .posts
            .read()
            .get(&post_id)
            .map(|p| p.author_id == user);
        match owned {
            Some(true) => {}
            Some(false) => {
                return Err(FeedError::Validation {
                    field: "post".to_string(),
                    message: "you can only delete your own posts".to_string(),
                })
            }
            None => return Err(FeedError::not_found("post", post_id)),
        }
        // The delete event coming back through the channel removes the
        // row locally.
        self.ctx.gateway.delete_post(post_id).await
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.read().items().to_vec()
    }

    pub fn is_liked(&self, post_id: PostId) -> bool {
        self.likes.is_liked(post_id)
    }

    /// Drain queued user-facing messages
    pub fn take_notices(&self) -> Vec<String> {
        self.notices.drain()
    }

    /// Identity transitions invalidate the liked set: sign-out clears
    /// it, sign-in reloads it for the new user.
    fn watch_identity(&self) {
        let mut changes = self.ctx.session.subscribe();
        let likes = self.likes.clone();
        let gateway = self.ctx.gateway.clone();
        let task = tokio::spawn(async move {
            while let Ok(change) = changes.recv().await {
                match change {
                    AuthChange::SignedOut => {
                        debug!("Identity cleared, resetting liked set");
                        likes.reset();
                    }
                    AuthChange::SignedIn(session) => {
                        likes.reset();
                        match gateway.liked_posts(session.user_id).await {
                            Ok(liked) => likes.load_membership(session.user_id, liked),
                            Err(err) => {
                                warn!(%err, "Failed to load liked set for new identity")
                            }
                        }
                    }
                }
            }
        });
        if let Some(old) = self.auth_watcher.lock().replace(task) {
            old.abort();
        }
    }
}

impl Drop for FeedScreen {
    fn drop(&mut self) {
        if let Some(task) = self.auth_watcher.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelManager;
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::FeedStore;
    use crate::session::SessionManager;
    use crate::types::NewPost;

    async fn setup() -> (Arc<MemoryGateway>, FeedScreen) {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed_user("ada@example.com", "hunter22", "ada");
        let session = Arc::new(SessionManager::new(gw.clone(), gw.clone()));
        session.start().await.unwrap();
        session.sign_in("ada@example.com", "hunter22").await.unwrap();
        let ctx = ScreenContext::new(gw.clone(), session, Arc::new(ChannelManager::new()));
        (gw, FeedScreen::new(ctx))
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_mount_requires_auth() {
        let gw = Arc::new(MemoryGateway::new());
        let session = Arc::new(SessionManager::new(gw.clone(), gw.clone()));
        session.start().await.unwrap();
        let ctx = ScreenContext::new(gw, session, Arc::new(ChannelManager::new()));
        let screen = FeedScreen::new(ctx);
        assert_eq!(screen.mount().await, Err(FeedError::AuthRequired));
    }

    #[tokio::test]
    async fn test_mount_loads_snapshot_and_opens_channel() {
        let (gw, screen) = setup().await;
        let user = screen.ctx.session.current_user().unwrap();
        gw.create_post(NewPost {
            author_id: user,
            content: "pre-existing".to_string(),
            image_url: None,
        })
        .await
        .unwrap();

        screen.mount().await.unwrap();
        assert_eq!(screen.posts().len(), 1);
        assert!(screen.ctx.channels.is_open(&FeedScreen::channel_key()));
    }

    #[tokio::test]
    async fn test_live_insert_appears() {
        let (gw, screen) = setup().await;
        screen.mount().await.unwrap();
        let user = screen.ctx.session.current_user().unwrap();

        gw.create_post(NewPost {
            author_id: user,
            content: "live".to_string(),
            image_url: None,
        })
        .await
        .unwrap();

        wait_for(|| screen.posts().len() == 1).await;
    }

    #[tokio::test]
    async fn test_unmount_closes_channel() {
        let (_gw, screen) = setup().await;
        screen.mount().await.unwrap();
        screen.unmount();
        assert!(!screen.ctx.channels.is_open(&FeedScreen::channel_key()));
    }

    #[tokio::test]
    async fn test_delete_rejects_foreign_post() {
        let (gw, screen) = setup().await;
        let other = gw.seed_user("bob@example.com", "pw", "bob");
        let post = gw
            .create_post(NewPost {
                author_id: other,
                content: "not yours".to_string(),
                image_url: None,
            })
            .await
            .unwrap();

        screen.mount().await.unwrap();
        wait_for(|| !screen.posts().is_empty()).await;
        assert!(matches!(
            screen.delete_post(post.id).await,
            Err(FeedError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_like_queues_notice() {
        let (gw, screen) = setup().await;
        let user = screen.ctx.session.current_user().unwrap();
        let post = gw
            .create_post(NewPost {
                author_id: user,
                content: "hello".to_string(),
                image_url: None,
            })
            .await
            .unwrap();
        screen.mount().await.unwrap();
        wait_for(|| !screen.posts().is_empty()).await;

        gw.fail_next(FeedError::Network("offline".to_string()));
        screen.toggle_like(post.id).await;
        assert_eq!(screen.take_notices().len(), 1);
        assert!(!screen.is_liked(post.id));
    }
}
