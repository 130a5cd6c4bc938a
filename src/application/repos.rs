//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::{CommentRecord, GroupRecord, PostRecord, SessionRecord, UserRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Feed predicate applied before ordering and pagination. At most one
/// of the fields is set; an empty filter selects the global feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedQueryFilter {
    pub group_id: Option<i64>,
    pub author_id: Option<i64>,
    /// Restrict to posts whose author is followed by this user.
    pub followed_by: Option<i64>,
}

impl FeedQueryFilter {
    pub fn group(group_id: i64) -> Self {
        Self {
            group_id: Some(group_id),
            ..Self::default()
        }
    }

    pub fn author(author_id: i64) -> Self {
        Self {
            author_id: Some(author_id),
            ..Self::default()
        }
    }

    pub fn followed_by(user_id: i64) -> Self {
        Self {
            followed_by: Some(user_id),
            ..Self::default()
        }
    }
}

/// A post joined with the context the feed surfaces render: author
/// handle, optional group reference, and comment tally.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItemRecord {
    pub post: PostRecord,
    pub author_username: String,
    pub group: Option<GroupRef>,
    pub comment_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupRef {
    pub title: String,
    pub slug: String,
}

/// A comment joined with its author handle for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentItemRecord {
    pub comment: CommentRecord,
    pub author_username: String,
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct CreateGroupParams {
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub author_id: i64,
    pub text: String,
    pub group_id: Option<i64>,
    pub image_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdatePostParams {
    pub id: i64,
    pub text: String,
    pub group_id: Option<i64>,
    /// `None` keeps the stored image; `Some(path)` replaces it.
    pub new_image_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateCommentParams {
    pub post_id: i64,
    pub author_id: i64,
    pub text: String,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    /// Insert a user; a taken username surfaces as [`RepoError::Duplicate`].
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, RepoError>;
}

#[async_trait]
pub trait GroupsRepo: Send + Sync {
    /// Insert a group; a taken slug surfaces as [`RepoError::Duplicate`].
    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<GroupRecord>, RepoError>;

    /// All groups ordered by title, for the post form selector.
    async fn list_all(&self) -> Result<Vec<GroupRecord>, RepoError>;
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// List feed items matching `filter`, newest first (ties broken by
    /// id descending), within the given window.
    async fn list_feed(
        &self,
        filter: &FeedQueryFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<FeedItemRecord>, RepoError>;

    async fn count_feed(&self, filter: &FeedQueryFilter) -> Result<u64, RepoError>;

    /// Single post with its display context, or `None` when unknown.
    async fn find_feed_item(&self, id: i64) -> Result<Option<FeedItemRecord>, RepoError>;
}

#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError>;

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError>;
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    async fn create_comment(&self, params: CreateCommentParams) -> Result<CommentRecord, RepoError>;

    /// Comments for a post in creation order, oldest first.
    async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentItemRecord>, RepoError>;
}

#[async_trait]
pub trait FollowsRepo: Send + Sync {
    /// Insert the edge if absent. Returns `true` when a new edge was
    /// created; an existing edge is left untouched and reported as
    /// `false` (idempotent insert, no duplicate rows).
    async fn insert_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError>;

    /// Delete the edge if present; returns whether a row was removed.
    async fn delete_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError>;

    async fn edge_exists(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError>;

    /// Number of users following `author_id`.
    async fn count_followers(&self, author_id: i64) -> Result<u64, RepoError>;

    /// Number of authors `user_id` follows.
    async fn count_following(&self, user_id: i64) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait SessionsRepo: Send + Sync {
    async fn insert_session(&self, session: SessionRecord) -> Result<(), RepoError>;

    async fn find_session(&self, token: &str) -> Result<Option<SessionRecord>, RepoError>;

    async fn delete_session(&self, token: &str) -> Result<(), RepoError>;

    /// Drop sessions that expired before `now`. Returns rows removed.
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}
