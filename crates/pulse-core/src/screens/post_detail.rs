//! Post detail screen
//!
//! One post with its comment thread. Comments arrive through a live
//! channel scoped to this post; a post deleted while the screen is
//! open flips the screen to `Unavailable` rather than erroring.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::channels::ChannelKey;
use crate::error::{FeedError, FeedResult};
use crate::reconciler::ListReconciler;
use crate::types::{Comment, NewComment, Post, PostId, MAX_CONTENT_LEN};

use super::{ImageAttachment, ScreenContext};

const COMMENT_IMAGE_BUCKET: &str = "comments";

/// What the screen is currently showing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DetailPhase {
    #[default]
    Loading,
    Ready,
    /// The post was deleted (or never existed); terminal for this
    /// screen instance
    Unavailable,
    Failed(String),
}

pub struct PostDetailScreen {
    ctx: ScreenContext,
    post_id: PostId,
    post: RwLock<Option<Post>>,
    comments: Arc<RwLock<ListReconciler<Comment>>>,
    phase: RwLock<DetailPhase>,
}

impl PostDetailScreen {
    pub fn new(ctx: ScreenContext, post_id: PostId) -> Self {
        Self {
            ctx,
            post_id,
            post: RwLock::new(None),
            comments: Arc::new(RwLock::new(ListReconciler::new())),
            phase: RwLock::new(DetailPhase::Loading),
        }
    }

    fn channel_key(&self) -> ChannelKey {
        ChannelKey::new(format!("detail:comments:{}", self.post_id))
    }

    /// Fetch the post and its comments, then open the comment channel.
    ///
    /// A missing post leaves the screen `Unavailable` with no channel
    /// open; there is nothing live to watch for a deleted row.
    pub async fn mount(&self) -> FeedResult<()> {
        self.ctx.session.current_user()?;
        info!(post_id = %self.post_id, "Mounting post detail");

        let post = match self.ctx.gateway.get_post(self.post_id).await {
            Ok(post) => post,
            Err(FeedError::NotFound(..)) => {
                *self.phase.write() = DetailPhase::Unavailable;
                return Ok(());
            }
            Err(err) => {
                *self.phase.write() = DetailPhase::Failed(err.to_string());
                return Err(err);
            }
        };
        let comments = match self.ctx.gateway.list_comments(self.post_id).await {
            Ok(comments) => comments,
            Err(err) => {
                *self.phase.write() = DetailPhase::Failed(err.to_string());
                return Err(err);
            }
        };
        *self.post.write() = Some(post);
        self.comments.write().load_snapshot(comments);

        let sub = match self.ctx.gateway.subscribe_comments(self.post_id).await {
            Ok(sub) => sub,
            Err(err) => {
                *self.phase.write() = DetailPhase::Failed(err.to_string());
                return Err(err);
            }
        };
        *self.phase.write() = DetailPhase::Ready;
        let gateway = self.ctx.gateway.clone();
        let post_id = self.post_id;
        self.ctx.channels.open(
            self.channel_key(),
            sub,
            self.comments.clone(),
            Box::new(move || {
                let gateway = gateway.clone();
                Box::pin(async move { gateway.list_comments(post_id).await })
            }),
        );
        Ok(())
    }

    pub fn unmount(&self) {
        info!(post_id = %self.post_id, "Unmounting post detail");
        self.ctx.channels.close(&self.channel_key());
    }

    /// Submit a comment, uploading an attached image first.
    ///
    /// No optimistic insert: the created comment reaches the thread
    /// through the channel, same as everyone else's. A failed upload
    /// aborts the whole submission; no comment is created without its
    /// image.
    pub async fn submit_comment(
        &self,
        content: &str,
        image: Option<ImageAttachment>,
    ) -> FeedResult<Comment> {
        let user = self.ctx.session.current_user()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(FeedError::validation("content", "comment cannot be empty"));
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(FeedError::validation(
                "content",
                format!("comment exceeds {} characters", MAX_CONTENT_LEN),
            ));
        }

        let image_url = match image {
            Some(image) => {
                let path = format!("{}/{}.{}", user, ulid::Ulid::new(), image.extension);
                let url = self
                    .ctx
                    .gateway
                    .upload(COMMENT_IMAGE_BUCKET, &path, image.bytes, &image.content_type)
                    .await?;
                Some(url)
            }
            None => None,
        };

        self.ctx
            .gateway
            .create_comment(NewComment {
                post_id: self.post_id,
                author_id: user,
                content: content.to_string(),
                image_url,
            })
            .await
    }

    /// Re-fetch the post header (comment counts, like counts move
    /// under the feed channel, not this one).
    pub async fn refresh_post(&self) -> FeedResult<()> {
        match self.ctx.gateway.get_post(self.post_id).await {
            Ok(post) => {
                *self.post.write() = Some(post);
                Ok(())
            }
            Err(FeedError::NotFound(..)) => {
                warn!(post_id = %self.post_id, "Post gone, marking unavailable");
                *self.phase.write() = DetailPhase::Unavailable;
                self.ctx.channels.close(&self.channel_key());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn phase(&self) -> DetailPhase {
        self.phase.read().clone()
    }

    pub fn post(&self) -> Option<Post> {
        self.post.read().clone()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.comments.read().items().to_vec()
    }
}
