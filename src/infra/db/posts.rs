use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;

use crate::application::repos::{
    CreatePostParams, FeedItemRecord, FeedQueryFilter, GroupRef, PostsRepo, PostsWriteRepo,
    RepoError, UpdatePostParams,
};
use crate::domain::entities::PostRecord;

use super::{PostgresRepositories, map_sqlx_error};

/// Feed ordering. Publication time descending, insertion order breaking
/// ties, so two posts sharing a timestamp render newest first.
const FEED_ORDER: &str = " ORDER BY p.published_at DESC, p.id DESC ";

const FEED_SELECT: &str = "SELECT \
        p.id, p.text, p.published_at, p.author_id, p.group_id, p.image_path, \
        u.username AS author_username, \
        g.title AS group_title, g.slug AS group_slug, \
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count \
     FROM posts p \
     INNER JOIN users u ON u.id = p.author_id \
     LEFT JOIN groups g ON g.id = p.group_id \
     WHERE 1=1 ";

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    text: String,
    published_at: OffsetDateTime,
    author_id: i64,
    group_id: Option<i64>,
    image_path: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            published_at: row.published_at,
            author_id: row.author_id,
            group_id: row.group_id,
            image_path: row.image_path,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FeedItemRow {
    id: i64,
    text: String,
    published_at: OffsetDateTime,
    author_id: i64,
    group_id: Option<i64>,
    image_path: Option<String>,
    author_username: String,
    group_title: Option<String>,
    group_slug: Option<String>,
    comment_count: i64,
}

impl FeedItemRow {
    fn into_record(self) -> Result<FeedItemRecord, RepoError> {
        let group = match (self.group_title, self.group_slug) {
            (Some(title), Some(slug)) => Some(GroupRef { title, slug }),
            _ => None,
        };
        let comment_count = PostgresRepositories::convert_count(self.comment_count)?;
        Ok(FeedItemRecord {
            post: PostRecord {
                id: self.id,
                text: self.text,
                published_at: self.published_at,
                author_id: self.author_id,
                group_id: self.group_id,
                image_path: self.image_path,
            },
            author_username: self.author_username,
            group,
            comment_count,
        })
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_feed(
        &self,
        filter: &FeedQueryFilter,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<FeedItemRecord>, RepoError> {
        let mut qb = QueryBuilder::new(FEED_SELECT);
        Self::apply_feed_filter(&mut qb, filter);
        qb.push(FEED_ORDER);
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(limit));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(offset).map_err(|_| {
            RepoError::from_persistence("feed offset exceeds supported range")
        })?);

        let rows = qb
            .build_query_as::<FeedItemRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(FeedItemRow::into_record).collect()
    }

    async fn count_feed(&self, filter: &FeedQueryFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE 1=1 ");
        Self::apply_feed_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn find_feed_item(&self, id: i64) -> Result<Option<FeedItemRecord>, RepoError> {
        let mut qb = QueryBuilder::new(FEED_SELECT);
        qb.push(" AND p.id = ");
        qb.push_bind(id);

        let row = qb
            .build_query_as::<FeedItemRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(FeedItemRow::into_record).transpose()
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            "INSERT INTO posts (author_id, text, group_id, image_path) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, text, published_at, author_id, group_id, image_path",
        )
        .bind(params.author_id)
        .bind(&params.text)
        .bind(params.group_id)
        .bind(&params.image_path)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    /// `published_at` is intentionally left untouched; edits do not
    /// re-surface a post in the feed.
    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(
            "UPDATE posts \
             SET text = $2, \
                 group_id = $3, \
                 image_path = COALESCE($4, image_path) \
             WHERE id = $1 \
             RETURNING id, text, published_at, author_id, group_id, image_path",
        )
        .bind(params.id)
        .bind(&params.text)
        .bind(params.group_id)
        .bind(&params.new_image_path)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }
}
