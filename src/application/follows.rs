//! Follow graph management: directed `user -> author` subscription edges.
//!
//! Uniqueness of an edge is enforced by the store schema (composite
//! primary key); the service therefore performs idempotent inserts and
//! deletes rather than check-then-act sequences, so concurrent duplicate
//! requests collapse to no-ops.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::debug;

use crate::application::repos::{FollowsRepo, RepoError};

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("users cannot follow themselves")]
    SelfFollow,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    /// The edge already existed; the call succeeded without change.
    AlreadyFollowing,
}

#[derive(Clone)]
pub struct FollowService {
    follows: Arc<dyn FollowsRepo>,
}

impl FollowService {
    pub fn new(follows: Arc<dyn FollowsRepo>) -> Self {
        Self { follows }
    }

    /// Create the `user -> author` edge. Following an author twice is a
    /// success that leaves exactly one edge; following yourself is an
    /// error the HTTP boundary surfaces as a silent redirect.
    pub async fn follow(&self, user_id: i64, author_id: i64) -> Result<FollowOutcome, FollowError> {
        if user_id == author_id {
            return Err(FollowError::SelfFollow);
        }

        let created = self.follows.insert_edge(user_id, author_id).await?;
        if created {
            counter!("piazza_follow_edges_created_total").increment(1);
            debug!(
                target = "piazza::follows",
                user_id, author_id, "follow edge created"
            );
            Ok(FollowOutcome::Created)
        } else {
            Ok(FollowOutcome::AlreadyFollowing)
        }
    }

    /// Remove the edge; a missing edge is a no-op success.
    pub async fn unfollow(&self, user_id: i64, author_id: i64) -> Result<bool, FollowError> {
        let removed = self.follows.delete_edge(user_id, author_id).await?;
        if removed {
            counter!("piazza_follow_edges_removed_total").increment(1);
            debug!(
                target = "piazza::follows",
                user_id, author_id, "follow edge removed"
            );
        }
        Ok(removed)
    }

    pub async fn is_following(&self, user_id: i64, author_id: i64) -> Result<bool, FollowError> {
        Ok(self.follows.edge_exists(user_id, author_id).await?)
    }

    pub async fn followers_count(&self, author_id: i64) -> Result<u64, FollowError> {
        Ok(self.follows.count_followers(author_id).await?)
    }

    pub async fn following_count(&self, user_id: i64) -> Result<u64, FollowError> {
        Ok(self.follows.count_following(user_id).await?)
    }
}
