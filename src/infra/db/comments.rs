use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::repos::{
    CommentItemRecord, CommentsRepo, CreateCommentParams, RepoError,
};
use crate::domain::entities::CommentRecord;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: i64,
    post_id: i64,
    author_id: i64,
    text: String,
    created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            author_id: row.author_id,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommentItemRow {
    id: i64,
    post_id: i64,
    author_id: i64,
    text: String,
    created_at: OffsetDateTime,
    author_username: String,
}

#[async_trait]
impl CommentsRepo for PostgresRepositories {
    async fn create_comment(&self, params: CreateCommentParams) -> Result<CommentRecord, RepoError> {
        let row = sqlx::query_as::<_, CommentRow>(
            "INSERT INTO comments (post_id, author_id, text) \
             VALUES ($1, $2, $3) \
             RETURNING id, post_id, author_id, text, created_at",
        )
        .bind(params.post_id)
        .bind(params.author_id)
        .bind(&params.text)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(CommentRecord::from(row))
    }

    async fn list_for_post(&self, post_id: i64) -> Result<Vec<CommentItemRecord>, RepoError> {
        // Conversation order: oldest first, insertion order breaking ties.
        let rows = sqlx::query_as::<_, CommentItemRow>(
            "SELECT c.id, c.post_id, c.author_id, c.text, c.created_at, \
                    u.username AS author_username \
             FROM comments c \
             INNER JOIN users u ON u.id = c.author_id \
             WHERE c.post_id = $1 \
             ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(post_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| CommentItemRecord {
                comment: CommentRecord {
                    id: row.id,
                    post_id: row.post_id,
                    author_id: row.author_id,
                    text: row.text,
                    created_at: row.created_at,
                },
                author_username: row.author_username,
            })
            .collect())
    }
}
