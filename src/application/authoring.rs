//! Post and comment authoring: validation, persistence, edit rights.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::info;

use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreatePostParams, GroupsRepo, PostsRepo, PostsWriteRepo,
    RepoError, UpdatePostParams,
};
use crate::domain::entities::{CommentRecord, PostRecord};
use crate::domain::error::DomainError;
use crate::domain::posts::{validate_comment_text, validate_image_payload, validate_post_text};
use crate::infra::media::{MediaStorage, MediaStorageError};

pub const UNKNOWN_GROUP_MESSAGE: &str = "Select a valid group. That choice does not exist.";

#[derive(Debug, Error)]
pub enum AuthoringError {
    /// User-correctable input problem; the carried message is rendered
    /// inline on the originating form.
    #[error("{0}")]
    Validation(String),
    #[error("target not found")]
    NotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("media storage failure: {0}")]
    Media(#[from] MediaStorageError),
}

impl From<DomainError> for AuthoringError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { .. } => AuthoringError::NotFound,
            DomainError::Validation { message } => AuthoringError::Validation(message),
            DomainError::Invariant { message } => {
                AuthoringError::Repo(RepoError::Integrity { message })
            }
        }
    }
}

/// Authorization decision for editing a post. Denial is a redirect to
/// the read-only view, never an error page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditDecision {
    Allowed,
    DeniedRedirect(String),
}

pub fn edit_decision(post: &PostRecord, author_username: &str, actor_id: i64) -> EditDecision {
    if post.author_id == actor_id {
        EditDecision::Allowed
    } else {
        EditDecision::DeniedRedirect(format!("/{author_username}/{}/", post.id))
    }
}

/// An uploaded image payload, already read into memory by the HTTP layer.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<ImageUpload>,
}

/// Result of an edit attempt that went through the authorization gate.
#[derive(Debug, Clone)]
pub enum EditOutcome {
    Saved(PostRecord),
    Denied { redirect: String },
}

#[derive(Clone)]
pub struct AuthoringService {
    posts: Arc<dyn PostsRepo>,
    posts_write: Arc<dyn PostsWriteRepo>,
    groups: Arc<dyn GroupsRepo>,
    comments: Arc<dyn CommentsRepo>,
    media: Arc<MediaStorage>,
}

impl AuthoringService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        posts_write: Arc<dyn PostsWriteRepo>,
        groups: Arc<dyn GroupsRepo>,
        comments: Arc<dyn CommentsRepo>,
        media: Arc<MediaStorage>,
    ) -> Self {
        Self {
            posts,
            posts_write,
            groups,
            comments,
            media,
        }
    }

    /// Validate and persist a new post. The image, when present, must
    /// decode as a raster image before anything is written; a bad upload
    /// leaves no post and no stored file behind.
    pub async fn create_post(
        &self,
        author_id: i64,
        input: PostInput,
    ) -> Result<PostRecord, AuthoringError> {
        let text = validate_post_text(&input.text)?;
        let group_id = self.resolve_group(input.group_id).await?;
        let image_path = self.store_image(input.image).await?;

        let record = self
            .posts_write
            .create_post(CreatePostParams {
                author_id,
                text,
                group_id,
                image_path,
            })
            .await?;

        counter!("piazza_posts_created_total").increment(1);
        info!(
            target = "piazza::authoring",
            post_id = record.id,
            author_id,
            "post created"
        );
        Ok(record)
    }

    /// Edit an existing post addressed as `/{username}/{post_id}/`.
    ///
    /// Only the author may save changes; any other authenticated actor is
    /// redirected to the post view with the stored text untouched. A new
    /// upload replaces the stored image, an absent upload keeps it, and
    /// `published_at` is never rewritten.
    pub async fn edit_post(
        &self,
        actor_id: i64,
        username: &str,
        post_id: i64,
        input: PostInput,
    ) -> Result<EditOutcome, AuthoringError> {
        let post = self.resolve_post(username, post_id).await?;

        if let EditDecision::DeniedRedirect(redirect) = edit_decision(&post, username, actor_id) {
            return Ok(EditOutcome::Denied { redirect });
        }

        let text = validate_post_text(&input.text)?;
        let group_id = self.resolve_group(input.group_id).await?;
        let new_image_path = self.store_image(input.image).await?;

        let record = self
            .posts_write
            .update_post(UpdatePostParams {
                id: post.id,
                text,
                group_id,
                new_image_path,
            })
            .await?;

        info!(
            target = "piazza::authoring",
            post_id = record.id,
            actor_id,
            "post edited"
        );
        Ok(EditOutcome::Saved(record))
    }

    /// Append a comment to the post; comments display oldest first.
    pub async fn add_comment(
        &self,
        author_id: i64,
        username: &str,
        post_id: i64,
        text: &str,
    ) -> Result<CommentRecord, AuthoringError> {
        let post = self.resolve_post(username, post_id).await?;
        let text = validate_comment_text(text)?;

        let record = self
            .comments
            .create_comment(CreateCommentParams {
                post_id: post.id,
                author_id,
                text,
            })
            .await?;

        counter!("piazza_comments_created_total").increment(1);
        Ok(record)
    }

    /// Load a post for the edit form, applying the same combined
    /// username-and-id lookup the detail page uses.
    pub async fn find_post(
        &self,
        username: &str,
        post_id: i64,
    ) -> Result<PostRecord, AuthoringError> {
        self.resolve_post(username, post_id).await
    }

    /// Fetch a post checking the username segment of the route; a
    /// mismatch is indistinguishable from an unknown post.
    async fn resolve_post(&self, username: &str, post_id: i64) -> Result<PostRecord, AuthoringError> {
        let item = self
            .posts
            .find_feed_item(post_id)
            .await?
            .ok_or(AuthoringError::NotFound)?;
        if item.author_username != username {
            return Err(AuthoringError::NotFound);
        }
        Ok(item.post)
    }

    async fn resolve_group(&self, group_id: Option<i64>) -> Result<Option<i64>, AuthoringError> {
        match group_id {
            None => Ok(None),
            Some(id) => match self.groups.find_by_id(id).await? {
                Some(group) => Ok(Some(group.id)),
                None => Err(AuthoringError::Validation(
                    UNKNOWN_GROUP_MESSAGE.to_string(),
                )),
            },
        }
    }

    async fn store_image(
        &self,
        image: Option<ImageUpload>,
    ) -> Result<Option<String>, AuthoringError> {
        let Some(upload) = image else {
            return Ok(None);
        };
        validate_image_payload(&upload.bytes)?;
        let stored = self.media.store(&upload.filename, &upload.bytes).await?;
        Ok(Some(stored))
    }
}
