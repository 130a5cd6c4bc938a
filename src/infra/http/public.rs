use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use crate::{
    application::{
        accounts::AccountService,
        authoring::AuthoringService,
        error::HttpError,
        feed::{FeedError, FeedService},
        follows::FollowService,
        repos::{GroupsRepo, UsersRepo},
    },
    infra::media::{MediaStorage, MediaStorageError},
    presentation::views::{
        GroupContext, GroupTemplate, IndexContext, IndexTemplate, LayoutContext, PostTemplate,
        ProfileContext, ProfileTemplate, render_not_found_response, render_template_response,
    },
};

use super::{
    auth::{self, Identity, login_redirect, resolve_identity},
    authoring,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub authoring: Arc<AuthoringService>,
    pub follows: Arc<FollowService>,
    pub accounts: Arc<AccountService>,
    pub users: Arc<dyn UsersRepo>,
    pub groups: Arc<dyn GroupsRepo>,
    pub media: Arc<MediaStorage>,
    pub body_limit_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/follow/", get(following_index))
        .route("/group/{slug}/", get(group_index))
        .route("/new/", get(authoring::new_post_form).post(authoring::create_post))
        .route("/auth/signup/", get(auth::signup_form).post(auth::signup))
        .route("/auth/login/", get(auth::login_form).post(auth::login))
        .route("/auth/logout/", get(auth::logout).post(auth::logout))
        .route("/media/{*path}", get(serve_media))
        .route("/{username}/", get(profile))
        .route("/{username}/follow/", get(follow_author))
        .route("/{username}/unfollow/", get(unfollow_author))
        .route("/{username}/{post_id}/", get(post_detail))
        .route(
            "/{username}/{post_id}/edit/",
            get(authoring::edit_post_form).post(authoring::update_post),
        )
        .route("/{username}/{post_id}/comment/", post(authoring::add_comment))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(state.body_limit_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PageQuery {
    pub page: Option<String>,
}

async fn index(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.feed.global_feed(query.page.as_deref()).await {
        Ok(feed) => {
            let content = IndexContext {
                heading: "Latest updates".to_string(),
                feed,
            };
            let view = LayoutContext::new(identity.viewer(), content);
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, &identity),
    }
}

async fn following_index(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> Response {
    let Some(user) = identity.0.as_ref() else {
        return login_redirect("/follow/");
    };

    match state
        .feed
        .following_feed(user.id, query.page.as_deref())
        .await
    {
        Ok(feed) => {
            let content = IndexContext {
                heading: "Posts from authors you follow".to_string(),
                feed,
            };
            let view = LayoutContext::new(identity.viewer(), content);
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, &identity),
    }
}

async fn group_index(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.feed.group_feed(&slug, query.page.as_deref()).await {
        Ok((group, feed)) => {
            let content = GroupContext {
                title: group.title,
                description: group.description,
                feed,
            };
            let view = LayoutContext::new(identity.viewer(), content);
            render_template_response(GroupTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, &identity),
    }
}

async fn profile(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let (author, feed) = match state.feed.author_feed(&username, query.page.as_deref()).await {
        Ok(result) => result,
        Err(err) => return feed_error_to_response(err, &identity),
    };

    let followers_count = match state.follows.followers_count(author.id).await {
        Ok(count) => count,
        Err(err) => return follow_failure("infra::http::public::profile", &err),
    };
    let following_count = match state.follows.following_count(author.id).await {
        Ok(count) => count,
        Err(err) => return follow_failure("infra::http::public::profile", &err),
    };

    let viewer = identity.0.as_ref();
    let is_self = viewer.is_some_and(|user| user.id == author.id);
    let is_following = match viewer {
        Some(user) if !is_self => match state.follows.is_following(user.id, author.id).await {
            Ok(value) => value,
            Err(err) => return follow_failure("infra::http::public::profile", &err),
        },
        _ => false,
    };

    let content = ProfileContext {
        author_username: author.username.clone(),
        post_count: feed.total_count,
        followers_count,
        following_count,
        is_self,
        is_following,
        can_follow: viewer.is_some() && !is_self,
        follow_href: format!("/{}/follow/", author.username),
        unfollow_href: format!("/{}/unfollow/", author.username),
        feed,
    };
    let view = LayoutContext::new(identity.viewer(), content);
    render_template_response(ProfileTemplate { view }, StatusCode::OK)
}

async fn post_detail(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path((username, post_id)): Path<(String, String)>,
) -> Response {
    // A non-numeric id is an unknown post, not a malformed request.
    let Ok(post_id) = post_id.parse::<i64>() else {
        return render_not_found_response(identity.viewer());
    };

    match state.feed.post_detail(&username, post_id).await {
        Ok(Some(content)) => {
            let view = LayoutContext::new(identity.viewer(), content);
            render_template_response(PostTemplate { view }, StatusCode::OK)
        }
        Ok(None) => render_not_found_response(identity.viewer()),
        Err(err) => feed_error_to_response(err, &identity),
    }
}

async fn follow_author(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Response {
    let Some(user) = identity.0.as_ref() else {
        return login_redirect(&format!("/{username}/follow/"));
    };

    let author = match resolve_author(&state, &username).await {
        Ok(Some(author)) => author,
        Ok(None) => return render_not_found_response(identity.viewer()),
        Err(response) => return response,
    };

    match state.follows.follow(user.id, author.id).await {
        // Self-follow and repeat follows both land back on the profile.
        Ok(_) | Err(crate::application::follows::FollowError::SelfFollow) => {
            axum::response::Redirect::to(&format!("/{username}/")).into_response()
        }
        Err(err) => follow_failure("infra::http::public::follow_author", &err),
    }
}

async fn unfollow_author(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path(username): Path<String>,
) -> Response {
    let Some(user) = identity.0.as_ref() else {
        return login_redirect(&format!("/{username}/unfollow/"));
    };

    let author = match resolve_author(&state, &username).await {
        Ok(Some(author)) => author,
        Ok(None) => return render_not_found_response(identity.viewer()),
        Err(response) => return response,
    };

    match state.follows.unfollow(user.id, author.id).await {
        Ok(_) => axum::response::Redirect::to(&format!("/{username}/")).into_response(),
        Err(err) => follow_failure("infra::http::public::unfollow_author", &err),
    }
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.media.read(&path).await {
        Ok(bytes) => build_media_response(&path, bytes),
        Err(MediaStorageError::InvalidPath | MediaStorageError::NotFound) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "File not found",
            "The requested file is not available",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored media"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read stored file",
                err.to_string(),
            )
            .into_response()
        }
    }
}

async fn fallback(Extension(identity): Extension<Identity>) -> Response {
    render_not_found_response(identity.viewer())
}

fn build_media_response(path: &str, bytes: Bytes) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut response = bytes.into_response();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response.headers_mut().insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    response
}

async fn resolve_author(
    state: &HttpState,
    username: &str,
) -> Result<Option<crate::domain::entities::UserRecord>, Response> {
    state.users.find_by_username(username).await.map_err(|err| {
        super::repo_error_to_http("infra::http::public::resolve_author", err).into_response()
    })
}

fn feed_error_to_response(err: FeedError, identity: &Identity) -> Response {
    match err {
        FeedError::NotFound { .. } => render_not_found_response(identity.viewer()),
        other => HttpError::from(other).into_response(),
    }
}

fn follow_failure(source: &'static str, err: &crate::application::follows::FollowError) -> Response {
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        err,
    )
    .into_response()
}
