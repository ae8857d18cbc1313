//! Optimistic like toggling
//!
//! A like toggle must feel instantaneous: membership and the displayed
//! count flip locally before the mutation is sent, and flip back if it
//! fails. Per post, the coordinator tracks the triple
//! (desired, confirmed, in-flight):
//!
//! - **desired**: what the user's taps say the state should be
//! - **confirmed**: the last state the server acknowledged
//! - **in-flight**: whether a driver loop is currently reconciling
//!
//! A post is *Confirmed* when desired == confirmed with nothing in
//! flight, *OptimisticPending* while a driver works toward desired,
//! and *RollingBack* in the failure path that restores confirmed
//! state.
//!
//! Toggles on a post whose mutation is still in flight are serialized:
//! the running driver keeps issuing one mutation at a time until
//! desired matches confirmed, so two rapid taps settle at the state
//! implied by the net number of taps with no count drift.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};
use crate::gateway::FeedStore;
use crate::reconciler::ListReconciler;
use crate::types::{LikeMark, Post, PostId, UserId};

#[derive(Default)]
struct Ledger {
    /// Identity the membership belongs to; `None` until seeded
    user: Option<UserId>,
    /// Local (optimistic) membership
    desired: HashSet<PostId>,
    /// Server-acknowledged membership
    confirmed: HashSet<PostId>,
    /// Posts with a driver loop running
    in_flight: HashSet<PostId>,
    /// Bumped on reset; drivers from an older epoch stop silently
    epoch: u64,
}

/// Coordinates optimistic like mutations for the current user.
///
/// Shares the posts reconciler with the owning screen so optimistic
/// count deltas (and their rollbacks) land in the same rows the screen
/// renders. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LikeCoordinator {
    store: Arc<dyn FeedStore>,
    posts: Arc<RwLock<ListReconciler<Post>>>,
    ledger: Arc<Mutex<Ledger>>,
}

impl LikeCoordinator {
    pub fn new(store: Arc<dyn FeedStore>, posts: Arc<RwLock<ListReconciler<Post>>>) -> Self {
        Self {
            store,
            posts,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    /// Seed membership from a snapshot query for `user`.
    ///
    /// Replaces both desired and confirmed state; any previous
    /// identity's membership is discarded.
    pub fn load_membership(&self, user: UserId, liked: HashSet<PostId>) {
        let mut ledger = self.ledger.lock();
        ledger.user = Some(user);
        ledger.desired = liked.clone();
        ledger.confirmed = liked;
        ledger.in_flight.clear();
        ledger.epoch += 1;
    }

    /// Drop all membership state. Called on identity change; a prior
    /// identity's likes must never leak into the next.
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock();
        ledger.user = None;
        ledger.desired.clear();
        ledger.confirmed.clear();
        ledger.in_flight.clear();
        ledger.epoch += 1;
    }

    /// Whether the current user has liked this post (optimistic view)
    pub fn is_liked(&self, post_id: PostId) -> bool {
        self.ledger.lock().desired.contains(&post_id)
    }

    /// Snapshot of the liked set (optimistic view)
    pub fn liked(&self) -> HashSet<PostId> {
        self.ledger.lock().desired.clone()
    }

    /// The identity the membership belongs to, if seeded
    pub fn current_user(&self) -> Option<UserId> {
        self.ledger.lock().user
    }

    /// Flip the like state for a post.
    ///
    /// Membership and the displayed count change before this awaits
    /// anything. If a driver is already reconciling this post the call
    /// returns immediately and the driver absorbs the new desired
    /// state; otherwise this call becomes the driver and returns once
    /// desired and confirmed agree, or with the error that forced a
    /// rollback.
    pub async fn toggle_like(&self, post_id: PostId) -> FeedResult<()> {
        let (user, epoch) = {
            let mut ledger = self.ledger.lock();
            let user = ledger.user.ok_or(FeedError::AuthRequired)?;

            let now_liked = if ledger.desired.contains(&post_id) {
                ledger.desired.remove(&post_id);
                false
            } else {
                ledger.desired.insert(post_id);
                true
            };
            // Exact inverse of the rollback delta; no clamping, so a
            // failed mutation restores the count bit-for-bit.
            let delta = if now_liked { 1 } else { -1 };
            self.posts.write().modify(&post_id, |p| p.like_count += delta);
            debug!(%post_id, liked = now_liked, "Optimistic like flip");

            if ledger.in_flight.contains(&post_id) {
                // A driver is running; it re-reads desired state on
                // every iteration and will issue the follow-up.
                return Ok(());
            }
            ledger.in_flight.insert(post_id);
            (user, ledger.epoch)
        };

        self.drive(post_id, user, epoch).await
    }

    /// Issue mutations one at a time until desired == confirmed
    async fn drive(&self, post_id: PostId, user: UserId, epoch: u64) -> FeedResult<()> {
        loop {
            let (desired, confirmed) = {
                let mut ledger = self.ledger.lock();
                if ledger.epoch != epoch {
                    // Identity changed mid-flight; state is gone.
                    return Ok(());
                }
                let desired = ledger.desired.contains(&post_id);
                let confirmed = ledger.confirmed.contains(&post_id);
                if desired == confirmed {
                    ledger.in_flight.remove(&post_id);
                    return Ok(());
                }
                (desired, confirmed)
            };

            let mark = LikeMark {
                post_id,
                user_id: user,
            };
            let result = if desired {
                self.store.insert_like(mark).await
            } else {
                self.store.delete_like(mark).await
            };

            match result {
                Ok(()) => {
                    let mut ledger = self.ledger.lock();
                    if ledger.epoch != epoch {
                        return Ok(());
                    }
                    if desired {
                        ledger.confirmed.insert(post_id);
                    } else {
                        ledger.confirmed.remove(&post_id);
                    }
                }
                Err(err) => {
                    warn!(%post_id, %err, "Like mutation failed, rolling back");
                    self.rollback(post_id, confirmed, epoch);
                    return Err(err);
                }
            }
        }
    }

    /// Restore membership and count to the last confirmed state
    fn rollback(&self, post_id: PostId, confirmed: bool, epoch: u64) {
        let mut ledger = self.ledger.lock();
        if ledger.epoch != epoch {
            return;
        }
        ledger.in_flight.remove(&post_id);

        let desired_now = ledger.desired.contains(&post_id);
        if desired_now == confirmed {
            // An even number of flips landed while the mutation was in
            // flight; local state already matches confirmed.
            return;
        }
        if confirmed {
            ledger.desired.insert(post_id);
        } else {
            ledger.desired.remove(&post_id);
        }
        let delta = if desired_now { -1 } else { 1 };
        self.posts.write().modify(&post_id, |p| p.like_count += delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::types::NewPost;

    async fn setup() -> (Arc<MemoryGateway>, LikeCoordinator, UserId, PostId) {
        let gw = Arc::new(MemoryGateway::new());
        let user = gw.seed_user("ada@example.com", "hunter22", "ada");
        let post = gw
            .create_post(NewPost {
                author_id: user,
                content: "likeable".to_string(),
                image_url: None,
            })
            .await
            .unwrap();

        let posts = Arc::new(RwLock::new(ListReconciler::new()));
        posts.write().load_snapshot(vec![post.clone()]);

        let coordinator = LikeCoordinator::new(gw.clone(), posts);
        coordinator.load_membership(user, HashSet::new());
        (gw, coordinator, user, post.id)
    }

    fn local_count(coordinator: &LikeCoordinator, post_id: PostId) -> i64 {
        coordinator
            .posts
            .read()
            .get(&post_id)
            .map(|p| p.like_count)
            .unwrap()
    }

    #[tokio::test]
    async fn test_toggle_like_then_unlike() {
        let (gw, coordinator, user, post_id) = setup().await;

        coordinator.toggle_like(post_id).await.unwrap();
        assert!(coordinator.is_liked(post_id));
        assert_eq!(local_count(&coordinator, post_id), 1);
        assert!(gw.liked_posts(user).await.unwrap().contains(&post_id));

        coordinator.toggle_like(post_id).await.unwrap();
        assert!(!coordinator.is_liked(post_id));
        assert_eq!(local_count(&coordinator, post_id), 0);
        assert!(gw.liked_posts(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_mutation_rolls_back() {
        let (gw, coordinator, _user, post_id) = setup().await;

        gw.fail_next(FeedError::Network("flaky".to_string()));
        let err = coordinator.toggle_like(post_id).await.unwrap_err();
        assert!(err.is_retryable());

        // Both the membership flag and the count are restored.
        assert!(!coordinator.is_liked(post_id));
        assert_eq!(local_count(&coordinator, post_id), 0);
    }

    #[tokio::test]
    async fn test_unlike_failure_restores_membership() {
        let (gw, coordinator, _user, post_id) = setup().await;
        coordinator.toggle_like(post_id).await.unwrap();

        gw.fail_next(FeedError::Network("flaky".to_string()));
        assert!(coordinator.toggle_like(post_id).await.is_err());

        assert!(coordinator.is_liked(post_id));
        assert_eq!(local_count(&coordinator, post_id), 1);
    }

    #[tokio::test]
    async fn test_toggle_requires_identity() {
        let (_gw, coordinator, _user, post_id) = setup().await;
        coordinator.reset();
        assert_eq!(
            coordinator.toggle_like(post_id).await,
            Err(FeedError::AuthRequired)
        );
    }

    #[tokio::test]
    async fn test_reset_clears_membership() {
        let (_gw, coordinator, _user, post_id) = setup().await;
        coordinator.toggle_like(post_id).await.unwrap();
        coordinator.reset();
        assert!(!coordinator.is_liked(post_id));
        assert!(coordinator.liked().is_empty());
    }

    #[tokio::test]
    async fn test_rapid_double_toggle_settles_clean() {
        let (gw, coordinator, user, post_id) = setup().await;

        // Two concurrent togglers: net effect must be "liked once".
        let c1 = coordinator.clone();
        let c2 = coordinator.clone();
        let t1 = tokio::spawn(async move { c1.toggle_like(post_id).await });
        let t2 = tokio::spawn(async move { c2.toggle_like(post_id).await });
        let _ = t1.await.unwrap();
        let _ = t2.await.unwrap();

        // Let any driver follow-ups finish.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let locally_liked = coordinator.is_liked(post_id);
        let server_liked = gw.liked_posts(user).await.unwrap().contains(&post_id);
        assert_eq!(locally_liked, server_liked);

        let server_count = gw.get_post(post_id).await.unwrap().like_count;
        assert_eq!(server_count, if server_liked { 1 } else { 0 });
        assert_eq!(local_count(&coordinator, post_id), server_count);
    }
}
