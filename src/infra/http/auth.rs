//! Session cookie handling and the signup/login/logout routes.

use axum::{
    Form,
    body::Body,
    extract::{Query, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use tracing::warn;

use crate::{
    application::accounts::{AccountError, INVALID_CREDENTIALS_MESSAGE, USERNAME_TAKEN_MESSAGE},
    application::error::HttpError,
    domain::entities::UserRecord,
    presentation::views::{
        LayoutContext, LoginContext, LoginTemplate, SignupContext, SignupTemplate, ViewerView,
        render_template_response,
    },
};

use super::public::HttpState;

pub const SESSION_COOKIE: &str = "piazza_session";

/// The resolved viewer, attached to every request by [`resolve_identity`].
#[derive(Clone)]
pub struct Identity(pub Option<UserRecord>);

impl Identity {
    pub fn viewer(&self) -> Option<ViewerView> {
        self.0.as_ref().map(|user| ViewerView::new(&user.username))
    }
}

/// Resolve the session cookie to a user before routing. A failed lookup
/// downgrades to anonymous rather than failing the page.
pub async fn resolve_identity(
    State(state): State<HttpState>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let user = match jar.get(SESSION_COOKIE) {
        Some(cookie) => match state.accounts.resolve(cookie.value()).await {
            Ok(user) => user,
            Err(err) => {
                warn!(
                    target = "piazza::http::auth",
                    error = %err,
                    "session resolution failed; treating request as anonymous"
                );
                None
            }
        },
        None => None,
    };

    request.extensions_mut().insert(Identity(user));
    next.run(request).await
}

/// Redirect an anonymous request to the login form, preserving the page
/// it was trying to reach.
pub fn login_redirect(next_path: &str) -> Response {
    Redirect::to(&format!("/auth/login/?next={next_path}")).into_response()
}

fn session_cookie(state: &HttpState, token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(state.accounts.session_ttl())
        .build()
}

/// Only same-site absolute paths survive; anything else falls back to
/// the home page so the login form cannot be used as an open redirect.
/// `/\` is rejected too since browsers normalize it to `//`.
fn sanitize_next(next: Option<&str>) -> &str {
    match next {
        Some(path)
            if path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\") =>
        {
            path
        }
        _ => "/",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NextQuery {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    next: Option<String>,
}

pub async fn signup_form(axum::Extension(identity): axum::Extension<Identity>) -> Response {
    if identity.0.is_some() {
        return Redirect::to("/").into_response();
    }
    render_signup(None, String::new(), StatusCode::OK)
}

pub async fn signup(
    State(state): State<HttpState>,
    jar: CookieJar,
    Form(form): Form<SignupForm>,
) -> Response {
    match state.accounts.signup(&form.username, &form.password).await {
        Ok((_, session)) => {
            let jar = jar.add(session_cookie(&state, session.token));
            (jar, Redirect::to("/")).into_response()
        }
        Err(AccountError::UsernameTaken) => render_signup(
            Some(USERNAME_TAKEN_MESSAGE.to_string()),
            form.username,
            StatusCode::OK,
        ),
        Err(AccountError::Validation(message)) => {
            render_signup(Some(message), form.username, StatusCode::OK)
        }
        Err(err) => account_failure("infra::http::auth::signup", &err),
    }
}

pub async fn login_form(
    axum::Extension(identity): axum::Extension<Identity>,
    Query(query): Query<NextQuery>,
) -> Response {
    if identity.0.is_some() {
        return Redirect::to(sanitize_next(query.next.as_deref())).into_response();
    }
    render_login(None, String::new(), query.next, StatusCode::OK)
}

pub async fn login(
    State(state): State<HttpState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match state.accounts.login(&form.username, &form.password).await {
        Ok((_, session)) => {
            let jar = jar.add(session_cookie(&state, session.token));
            let target = sanitize_next(form.next.as_deref()).to_string();
            (jar, Redirect::to(&target)).into_response()
        }
        Err(AccountError::InvalidCredentials | AccountError::Validation(_)) => render_login(
            Some(INVALID_CREDENTIALS_MESSAGE.to_string()),
            form.username,
            form.next,
            StatusCode::OK,
        ),
        Err(err) => account_failure("infra::http::auth::login", &err),
    }
}

pub async fn logout(State(state): State<HttpState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Err(err) = state.accounts.logout(cookie.value()).await {
            warn!(
                target = "piazza::http::auth",
                error = %err,
                "session deletion failed during logout"
            );
        }
    }

    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build());
    (jar, Redirect::to("/")).into_response()
}

fn render_signup(error: Option<String>, username: String, status: StatusCode) -> Response {
    let view = LayoutContext::new(None, SignupContext { error, username });
    render_template_response(SignupTemplate { view }, status)
}

fn render_login(
    error: Option<String>,
    username: String,
    next: Option<String>,
    status: StatusCode,
) -> Response {
    let next = sanitize_next(next.as_deref()).to_string();
    let view = LayoutContext::new(
        None,
        LoginContext {
            error,
            username,
            next,
        },
    );
    render_template_response(LoginTemplate { view }, status)
}

fn account_failure(source: &'static str, err: &AccountError) -> Response {
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        err,
    )
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_paths_survive() {
        assert_eq!(sanitize_next(Some("/new/")), "/new/");
        assert_eq!(sanitize_next(Some("/kurt/5/")), "/kurt/5/");
    }

    #[test]
    fn external_and_protocol_relative_targets_fall_back_home() {
        assert_eq!(sanitize_next(None), "/");
        assert_eq!(sanitize_next(Some("")), "/");
        assert_eq!(sanitize_next(Some("https://evil.example")), "/");
        assert_eq!(sanitize_next(Some("//evil.example")), "/");
        assert_eq!(sanitize_next(Some("/\\evil.example")), "/");
    }
}
