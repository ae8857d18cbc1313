//! Profile screen
//!
//! The signed-in user's profile and their posts, with a live channel
//! filtered to that author. Profile edits validate the username and
//! replace the avatar at a deterministic storage path so a new upload
//! supersedes the old one.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::channels::ChannelKey;
use crate::error::{FeedError, FeedResult};
use crate::reconciler::ListReconciler;
use crate::types::{valid_username, Post, Profile, ProfileUpdate, UserId};

use super::{ImageAttachment, ScreenContext};

const AVATAR_BUCKET: &str = "avatars";

/// Editable profile fields as the form holds them
#[derive(Debug, Clone, Default)]
pub struct ProfileForm {
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub favorite_workout: String,
}

pub struct ProfileScreen {
    ctx: ScreenContext,
    profile: RwLock<Option<Profile>>,
    posts: Arc<RwLock<ListReconciler<Post>>>,
}

impl ProfileScreen {
    pub fn new(ctx: ScreenContext) -> Self {
        Self {
            ctx,
            profile: RwLock::new(None),
            posts: Arc::new(RwLock::new(ListReconciler::new())),
        }
    }

    fn channel_key(user: UserId) -> ChannelKey {
        ChannelKey::new(format!("profile:posts:{}", user))
    }

    /// Load the profile and the user's own posts, then open the
    /// author-filtered channel.
    pub async fn mount(&self) -> FeedResult<()> {
        let user = self.ctx.session.current_user()?;
        info!(%user, "Mounting profile screen");

        let profile = self.ctx.gateway.get_profile(user).await?;
        let posts = self.ctx.gateway.posts_by_author(user).await?;
        *self.profile.write() = Some(profile);
        self.posts.write().load_snapshot(posts);

        let sub = self.ctx.gateway.subscribe_posts_by(user).await?;
        let gateway = self.ctx.gateway.clone();
        self.ctx.channels.open(
            Self::channel_key(user),
            sub,
            self.posts.clone(),
            Box::new(move || {
                let gateway = gateway.clone();
                Box::pin(async move { gateway.posts_by_author(user).await })
            }),
        );
        Ok(())
    }

    pub fn unmount(&self) {
        if let Some(profile) = self.profile.read().as_ref() {
            info!(user = %profile.id, "Unmounting profile screen");
            self.ctx.channels.close(&Self::channel_key(profile.id));
        }
    }

    /// Save edited profile fields, uploading a new avatar first.
    ///
    /// Username changes are checked for shape and uniqueness here so
    /// the form can show a field-level error; the gateway enforces the
    /// same rules again.
    pub async fn save(
        &self,
        form: ProfileForm,
        avatar: Option<ImageAttachment>,
    ) -> FeedResult<Profile> {
        let user = self.ctx.session.current_user()?;
        let username = form.username.trim().to_lowercase();
        if !valid_username(&username) {
            return Err(FeedError::validation(
                "username",
                "use letters, numbers, and underscores only",
            ));
        }

        let current = self.profile.read().clone();
        let username_changed = current
            .as_ref()
            .map(|p| p.username != username)
            .unwrap_or(true);
        if username_changed && self.ctx.gateway.username_taken(&username).await? {
            return Err(FeedError::validation("username", "already taken"));
        }

        let avatar_url = match avatar {
            Some(image) => {
                // Fixed path per user: re-uploading replaces the old
                // avatar object instead of accumulating orphans.
                let path = format!("{}/avatar.{}", user, image.extension);
                let url = self
                    .ctx
                    .gateway
                    .upload(AVATAR_BUCKET, &path, image.bytes, &image.content_type)
                    .await?;
                Some(url)
            }
            None => current.as_ref().and_then(|p| p.avatar_url.clone()),
        };

        let updated = self
            .ctx
            .gateway
            .update_profile(ProfileUpdate {
                user_id: user,
                username,
                display_name: form.display_name.trim().to_string(),
                bio: form.bio.trim().to_string(),
                favorite_workout: form.favorite_workout.trim().to_string(),
                avatar_url,
            })
            .await?;
        info!(user = %updated.id, "Profile saved");
        *self.profile.write() = Some(updated.clone());
        Ok(updated)
    }

    pub fn profile(&self) -> Option<Profile> {
        self.profile.read().clone()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.read().items().to_vec()
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
    use bytes::Bytes;

    async fn setup() -> (Arc<MemoryGateway>, ProfileScreen) {
        let gw = Arc::new(MemoryGateway::new());
        gw.seed_user("ada@example.com", "hunter22", "ada");
        let session = Arc::new(SessionManager::new(gw.clone(), gw.clone()));
        session.start().await.unwrap();
        session.sign_in("ada@example.com", "hunter22").await.unwrap();
        let ctx = ScreenContext::new(gw.clone(), session, Arc::new(ChannelManager::new()));
        (gw, ProfileScreen::new(ctx))
    }

    fn form(username: &str) -> ProfileForm {
        ProfileForm {
            username: username.to_string(),
            display_name: "Ada".to_string(),
            bio: "lifting things".to_string(),
            favorite_workout: "deadlift".to_string(),
        }
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
    async fn test_mount_loads_own_profile_and_posts() {
        let (gw, screen) = setup().await;
        let user = screen.ctx.session.current_user().unwrap();
        gw.create_post(NewPost {
            author_id: user,
            content: "mine".to_string(),
            image_url: None,
        })
        .await
        .unwrap();

        screen.mount().await.unwrap();
        assert_eq!(screen.profile().unwrap().username, "ada");
        assert_eq!(screen.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_filters_to_own_posts() {
        let (gw, screen) = setup().await;
        let user = screen.ctx.session.current_user().unwrap();
        let other = gw.seed_user("bob@example.com", "pw", "bob");
        screen.mount().await.unwrap();

        gw.create_post(NewPost {
            author_id: other,
            content: "bob's".to_string(),
            image_url: None,
        })
        .await
        .unwrap();
        gw.create_post(NewPost {
            author_id: user,
            content: "mine".to_string(),
            image_url: None,
        })
        .await
        .unwrap();

        wait_for(|| screen.posts().len() == 1).await;
        assert_eq!(screen.posts()[0].content, "mine");
    }

    #[tokio::test]
    async fn test_save_rejects_bad_username() {
        let (_gw, screen) = setup().await;
        screen.mount().await.unwrap();
        assert!(matches!(
            screen.save(form("has spaces!"), None).await,
            Err(FeedError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_taken_username() {
        let (gw, screen) = setup().await;
        gw.seed_user("bob@example.com", "pw", "bob");
        screen.mount().await.unwrap();
        assert_eq!(
            screen.save(form("bob"), None).await,
            Err(FeedError::validation("username", "already taken"))
        );
    }

    #[tokio::test]
    async fn test_keeping_own_username_is_allowed() {
        let (_gw, screen) = setup().await;
        screen.mount().await.unwrap();
        let updated = screen.save(form("ada"), None).await.unwrap();
        assert_eq!(updated.bio, "lifting things");
    }

    #[tokio::test]
    async fn test_avatar_replaces_at_fixed_path() {
        let (gw, screen) = setup().await;
        let user = screen.ctx.session.current_user().unwrap();
        screen.mount().await.unwrap();

        let avatar = |data: &'static [u8]| ImageAttachment {
            bytes: Bytes::from_static(data),
            content_type: "image/png".to_string(),
            extension: "png".to_string(),
        };
        screen.save(form("ada"), Some(avatar(b"v1"))).await.unwrap();
        screen.save(form("ada"), Some(avatar(b"v2"))).await.unwrap();

        let path = format!("{}/avatar.png", user);
        assert_eq!(
            gw.object_bytes(AVATAR_BUCKET, &path).unwrap(),
            Bytes::from_static(b"v2")
        );
    }

    #[tokio::test]
    async fn test_save_without_avatar_keeps_existing_url() {
        let (_gw, screen) = setup().await;
        screen.mount().await.unwrap();

        let avatar = ImageAttachment {
            bytes: Bytes::from_static(b"v1"),
            content_type: "image/png".to_string(),
            extension: "png".to_string(),
        };
        let first = screen.save(form("ada"), Some(avatar)).await.unwrap();
        assert!(first.avatar_url.is_some());

        let second = screen.save(form("ada"), None).await.unwrap();
        assert_eq!(second.avatar_url, first.avatar_url);
    }
}
