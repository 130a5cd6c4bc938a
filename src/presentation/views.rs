use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};

use crate::application::error::{ErrorReport, HttpError};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(viewer: Option<ViewerView>) -> Response {
    let content = ErrorPageView::not_found();
    let view = LayoutContext::new(viewer, content);
    let mut response = render_template_response(ErrorTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// The authenticated user as the layout sees it.
#[derive(Clone)]
pub struct ViewerView {
    pub username: String,
    pub profile_href: String,
    pub new_post_href: String,
}

impl ViewerView {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            profile_href: format!("/{username}/"),
            new_post_href: "/new/".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub viewer: Option<ViewerView>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(viewer: Option<ViewerView>, content: T) -> Self {
        Self { viewer, content }
    }
}

#[derive(Clone)]
pub struct GroupBadge {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct PostCard {
    pub id: i64,
    pub author_username: String,
    pub author_href: String,
    pub detail_href: String,
    pub text: String,
    pub published: String,
    pub iso_date: String,
    pub group: Option<GroupBadge>,
    pub image_src: Option<String>,
    pub comment_count: u64,
}

/// One page of a feed surface plus the pagination chrome around it.
#[derive(Clone)]
pub struct FeedPageContext {
    pub posts: Vec<PostCard>,
    pub post_count: usize,
    pub total_count: u64,
    pub page_number: u32,
    pub num_pages: u32,
    pub has_previous: bool,
    pub has_next: bool,
    pub previous_href: String,
    pub next_href: String,
    pub has_results: bool,
}

pub struct IndexContext {
    pub heading: String,
    pub feed: FeedPageContext,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<IndexContext>,
}

pub struct GroupContext {
    pub title: String,
    pub description: String,
    pub feed: FeedPageContext,
}

#[derive(Template)]
#[template(path = "group.html")]
pub struct GroupTemplate {
    pub view: LayoutContext<GroupContext>,
}

pub struct ProfileContext {
    pub author_username: String,
    pub post_count: u64,
    pub followers_count: u64,
    pub following_count: u64,
    pub is_self: bool,
    pub is_following: bool,
    pub can_follow: bool,
    pub follow_href: String,
    pub unfollow_href: String,
    pub feed: FeedPageContext,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileContext>,
}

#[derive(Clone)]
pub struct CommentView {
    pub author_username: String,
    pub author_href: String,
    pub text: String,
    pub created: String,
}

pub struct PostDetailContext {
    pub post: PostCard,
    pub author_post_count: u64,
    pub comments: Vec<CommentView>,
    pub comment_error: Option<String>,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub view: LayoutContext<PostDetailContext>,
}

#[derive(Clone)]
pub struct GroupOption {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

/// Shared create/edit form. The heading and action target are the only
/// differences between the two routes.
pub struct PostFormContext {
    pub heading: String,
    pub submit_label: String,
    pub action_href: String,
    pub text: String,
    pub groups: Vec<GroupOption>,
    pub error: Option<String>,
    pub current_image: Option<String>,
    pub cancel_href: Option<String>,
}

#[derive(Template)]
#[template(path = "post_form.html")]
pub struct PostFormTemplate {
    pub view: LayoutContext<PostFormContext>,
}

pub struct LoginContext {
    pub error: Option<String>,
    pub username: String,
    pub next: String,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub view: LayoutContext<LoginContext>,
}

pub struct SignupContext {
    pub error: Option<String>,
    pub username: String,
}

#[derive(Template)]
#[template(path = "signup.html")]
pub struct SignupTemplate {
    pub view: LayoutContext<SignupContext>,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist. Try returning to the homepage."
                .to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}

/// Human-facing timestamp, e.g. `15 August 2026`.
pub fn display_date(value: OffsetDateTime) -> String {
    let format = format_description!("[day padding:none] [month repr:long] [year]");
    value.format(&format).unwrap_or_default()
}

/// Machine-readable timestamp for `<time datetime>` attributes.
pub fn iso_date(value: OffsetDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_default()
}
