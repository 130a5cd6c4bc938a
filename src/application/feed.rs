//! Feed composition: filter, order, paginate.
//!
//! Every feed surface goes through [`FeedService::compose`], which applies
//! one scope predicate, orders by publication time descending (ties broken
//! by id descending, so the most recently inserted post wins), and cuts a
//! fixed-size page. Composing the same scope and page twice between writes
//! returns identical output; ordering is fully determined by stored data.

use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{FEED_PAGE_SIZE, Paginator, parse_page_param};
use crate::application::repos::{
    FeedItemRecord, FeedQueryFilter, GroupsRepo, PostsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::{GroupRecord, UserRecord};
use crate::presentation::views::{
    CommentView, FeedPageContext, GroupBadge, PostCard, PostDetailContext, display_date, iso_date,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown {entity}")]
    NotFound { entity: &'static str },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct FeedService {
    posts: Arc<dyn PostsRepo>,
    groups: Arc<dyn GroupsRepo>,
    users: Arc<dyn UsersRepo>,
    comments: Arc<dyn crate::application::repos::CommentsRepo>,
}

impl FeedService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        groups: Arc<dyn GroupsRepo>,
        users: Arc<dyn UsersRepo>,
        comments: Arc<dyn crate::application::repos::CommentsRepo>,
    ) -> Self {
        Self {
            posts,
            groups,
            users,
            comments,
        }
    }

    pub async fn global_feed(&self, page: Option<&str>) -> Result<FeedPageContext, FeedError> {
        self.compose(&FeedQueryFilter::default(), page, "/").await
    }

    pub async fn group_feed(
        &self,
        slug: &str,
        page: Option<&str>,
    ) -> Result<(GroupRecord, FeedPageContext), FeedError> {
        let group = self
            .groups
            .find_by_slug(slug)
            .await?
            .ok_or(FeedError::NotFound { entity: "group" })?;
        let base = format!("/group/{}/", group.slug);
        let feed = self
            .compose(&FeedQueryFilter::group(group.id), page, &base)
            .await?;
        Ok((group, feed))
    }

    pub async fn author_feed(
        &self,
        username: &str,
        page: Option<&str>,
    ) -> Result<(UserRecord, FeedPageContext), FeedError> {
        let author = self
            .users
            .find_by_username(username)
            .await?
            .ok_or(FeedError::NotFound { entity: "user" })?;
        let base = format!("/{}/", author.username);
        let feed = self
            .compose(&FeedQueryFilter::author(author.id), page, &base)
            .await?;
        Ok((author, feed))
    }

    pub async fn following_feed(
        &self,
        user_id: i64,
        page: Option<&str>,
    ) -> Result<FeedPageContext, FeedError> {
        self.compose(&FeedQueryFilter::followed_by(user_id), page, "/follow/")
            .await
    }

    /// Single post addressed as `/{username}/{post_id}/`. A known post id
    /// under the wrong username resolves to `None`, matching the combined
    /// lookup on the original route.
    pub async fn post_detail(
        &self,
        username: &str,
        post_id: i64,
    ) -> Result<Option<PostDetailContext>, FeedError> {
        let Some(item) = self.posts.find_feed_item(post_id).await? else {
            return Ok(None);
        };
        if item.author_username != username {
            return Ok(None);
        }

        let author_post_count = self
            .posts
            .count_feed(&FeedQueryFilter::author(item.post.author_id))
            .await?;

        let comments = self
            .comments
            .list_for_post(item.post.id)
            .await?
            .into_iter()
            .map(|record| CommentView {
                author_username: record.author_username.clone(),
                author_href: format!("/{}/", record.author_username),
                text: record.comment.text,
                created: display_date(record.comment.created_at),
            })
            .collect();

        Ok(Some(PostDetailContext {
            post: record_to_card(&item),
            author_post_count,
            comments,
            comment_error: None,
        }))
    }

    async fn compose(
        &self,
        filter: &FeedQueryFilter,
        page_param: Option<&str>,
        base_path: &str,
    ) -> Result<FeedPageContext, FeedError> {
        let requested = parse_page_param(page_param);
        let total = self.posts.count_feed(filter).await?;

        let paginator = Paginator::new(FEED_PAGE_SIZE);
        let bounds = paginator.bounds(total, requested);

        let items = self
            .posts
            .list_feed(filter, bounds.limit, bounds.offset)
            .await?;

        let posts: Vec<PostCard> = items.iter().map(record_to_card).collect();
        let post_count = posts.len();

        Ok(FeedPageContext {
            posts,
            post_count,
            total_count: total,
            page_number: bounds.page_number,
            num_pages: bounds.num_pages,
            has_previous: bounds.page_number > 1,
            has_next: bounds.page_number < bounds.num_pages,
            previous_href: format!("{base_path}?page={}", bounds.page_number.saturating_sub(1)),
            next_href: format!("{base_path}?page={}", bounds.page_number + 1),
            has_results: post_count > 0,
        })
    }
}

fn record_to_card(item: &FeedItemRecord) -> PostCard {
    PostCard {
        id: item.post.id,
        author_username: item.author_username.clone(),
        author_href: format!("/{}/", item.author_username),
        detail_href: format!("/{}/{}/", item.author_username, item.post.id),
        text: item.post.text.clone(),
        published: display_date(item.post.published_at),
        iso_date: iso_date(item.post.published_at),
        group: item.group.as_ref().map(|group| GroupBadge {
            title: group.title.clone(),
            href: format!("/group/{}/", group.slug),
        }),
        image_src: item
            .post
            .image_path
            .as_ref()
            .map(|path| format!("/media/{path}")),
        comment_count: item.comment_count,
    }
}
