use async_trait::async_trait;

use crate::application::repos::{FollowsRepo, RepoError};

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FollowsRepo for PostgresRepositories {
    /// Idempotent insert against the composite primary key. Returns
    /// whether a new edge was written.
    async fn insert_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "INSERT INTO follows (user_id, author_id) \
             VALUES ($1, $2) \
             ON CONFLICT (user_id, author_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(author_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_edge(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "DELETE FROM follows WHERE user_id = $1 AND author_id = $2",
        )
        .bind(user_id)
        .bind(author_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn edge_exists(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM follows WHERE user_id = $1 AND author_id = $2)",
        )
        .bind(user_id)
        .bind(author_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(exists)
    }

    async fn count_followers(&self, author_id: i64) -> Result<u64, RepoError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE author_id = $1")
                .bind(author_id)
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn count_following(&self, user_id: i64) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }
}
