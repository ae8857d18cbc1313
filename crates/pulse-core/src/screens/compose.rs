//! Compose screen
//!
//! Stateless submit path for new posts: validate, upload the image if
//! one is attached, create the row. The feed channel delivers the
//! created post back to every open feed, including the author's own.

use tracing::info;

use crate::error::{FeedError, FeedResult};
use crate::types::{NewPost, Post, MAX_CONTENT_LEN};

use super::{ImageAttachment, ScreenContext};

const POST_IMAGE_BUCKET: &str = "posts";

pub struct ComposeScreen {
    ctx: ScreenContext,
}

impl ComposeScreen {
    pub fn new(ctx: ScreenContext) -> Self {
        Self { ctx }
    }

    /// Create a post from the composer's fields.
    ///
    /// The image upload happens first; if it fails, no post is
    /// created. Returns the created row so the caller can navigate
    /// straight to it without waiting for the channel echo.
    pub async fn submit(
        &self,
        content: &str,
        image: Option<ImageAttachment>,
    ) -> FeedResult<Post> {
        let user = self.ctx.session.current_user()?;
        let content = content.trim();
        if content.is_empty() {
            return Err(FeedError::validation("content", "post cannot be empty"));
        }
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(FeedError::validation(
                "content",
                format!("post exceeds {} characters", MAX_CONTENT_LEN),
            ));
        }

        let image_url = match image {
            Some(image) => {
                let path = format!("{}/{}.{}", user, ulid::Ulid::new(), image.extension);
                let url = self
                    .ctx
                    .gateway
                    .upload(POST_IMAGE_BUCKET, &path, image.bytes, &image.content_type)
                    .await?;
                Some(url)
            }
            None => None,
        };

        let post = self
            .ctx
            .gateway
            .create_post(NewPost {
                author_id: user,
                content: content.to_string(),
                image_url,
            })
            .await?;
        info!(post_id = %post.id, "Post created");
        Ok(post)
    }
}
