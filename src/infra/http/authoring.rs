//! Post creation, editing, and commenting routes. All of them require a
//! logged-in viewer; anonymous requests bounce to the login form.

use axum::{
    Extension, Form,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::Multipart;
use serde::Deserialize;

use crate::{
    application::authoring::{
        AuthoringError, EditOutcome, ImageUpload, PostInput, UNKNOWN_GROUP_MESSAGE,
    },
    application::error::HttpError,
    presentation::views::{
        GroupOption, LayoutContext, PostFormContext, PostFormTemplate, PostTemplate,
        render_not_found_response, render_template_response,
    },
};

use super::{
    auth::{Identity, login_redirect},
    public::HttpState,
    repo_error_to_http,
};

enum PostFormError {
    /// The multipart stream itself failed or exceeded the body limit.
    Payload(HttpError),
    /// The group selector carried a value that is not an id.
    InvalidGroup,
}

async fn read_post_form(mut multipart: Multipart) -> Result<PostInput, PostFormError> {
    const SOURCE: &str = "infra::http::authoring::read_post_form";

    let mut input = PostInput::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(PostFormError::Payload(HttpError::new(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "Malformed form submission",
                    err.to_string(),
                )));
            }
        };

        match field.name() {
            Some("text") => {
                input.text = field.text().await.map_err(|err| {
                    PostFormError::Payload(HttpError::new(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Malformed form submission",
                        err.to_string(),
                    ))
                })?;
            }
            Some("group") => {
                let raw = field.text().await.map_err(|err| {
                    PostFormError::Payload(HttpError::new(
                        SOURCE,
                        StatusCode::BAD_REQUEST,
                        "Malformed form submission",
                        err.to_string(),
                    ))
                })?;
                let raw = raw.trim().to_string();
                if !raw.is_empty() {
                    input.group_id =
                        Some(raw.parse::<i64>().map_err(|_| PostFormError::InvalidGroup)?);
                }
            }
            Some("image") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|err| {
                    PostFormError::Payload(HttpError::new(
                        SOURCE,
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Uploaded file is too large",
                        err.to_string(),
                    ))
                })?;
                // Browsers submit an empty file part when nothing was picked.
                if let Some(filename) = filename.filter(|name| !name.is_empty()) {
                    if !bytes.is_empty() {
                        input.image = Some(ImageUpload { filename, bytes });
                    }
                }
            }
            _ => {}
        }
    }

    Ok(input)
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    #[serde(default)]
    text: String,
}

pub async fn new_post_form(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
) -> Response {
    if identity.0.is_none() {
        return login_redirect("/new/");
    }

    render_post_form(&state, &identity, NewFormParams::create(), None).await
}

pub async fn create_post(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> Response {
    let Some(user) = identity.0.clone() else {
        return login_redirect("/new/");
    };

    let input = match read_post_form(multipart).await {
        Ok(input) => input,
        Err(PostFormError::Payload(err)) => return err.into_response(),
        Err(PostFormError::InvalidGroup) => {
            let params = NewFormParams::create();
            return render_post_form(
                &state,
                &identity,
                params,
                Some(UNKNOWN_GROUP_MESSAGE.to_string()),
            )
            .await;
        }
    };

    let retained = FormEcho::from_input(&input);
    match state.authoring.create_post(user.id, input).await {
        Ok(_) => Redirect::to("/").into_response(),
        Err(AuthoringError::Validation(message)) => {
            let params = NewFormParams::create().with_echo(retained);
            render_post_form(&state, &identity, params, Some(message)).await
        }
        Err(AuthoringError::NotFound) => render_not_found_response(identity.viewer()),
        Err(err) => authoring_failure("infra::http::authoring::create_post", &err),
    }
}

pub async fn edit_post_form(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path((username, post_id)): Path<(String, String)>,
) -> Response {
    let Some(user) = identity.0.clone() else {
        return login_redirect(&format!("/{username}/{post_id}/edit/"));
    };
    let Ok(post_id) = post_id.parse::<i64>() else {
        return render_not_found_response(identity.viewer());
    };

    let post = match state.authoring.find_post(&username, post_id).await {
        Ok(post) => post,
        Err(AuthoringError::NotFound) => return render_not_found_response(identity.viewer()),
        Err(err) => return authoring_failure("infra::http::authoring::edit_post_form", &err),
    };

    if post.author_id != user.id {
        return Redirect::to(&format!("/{username}/{post_id}/")).into_response();
    }

    let params = NewFormParams::edit(&username, post_id)
        .with_echo(FormEcho {
            text: post.text.clone(),
            group_id: post.group_id,
        })
        .with_current_image(post.image_path.as_deref());
    render_post_form(&state, &identity, params, None).await
}

pub async fn update_post(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path((username, post_id)): Path<(String, String)>,
    multipart: Multipart,
) -> Response {
    let Some(user) = identity.0.clone() else {
        return login_redirect(&format!("/{username}/{post_id}/edit/"));
    };
    let Ok(post_id) = post_id.parse::<i64>() else {
        return render_not_found_response(identity.viewer());
    };

    let input = match read_post_form(multipart).await {
        Ok(input) => input,
        Err(PostFormError::Payload(err)) => return err.into_response(),
        Err(PostFormError::InvalidGroup) => {
            let params = NewFormParams::edit(&username, post_id);
            return render_post_form(
                &state,
                &identity,
                params,
                Some(UNKNOWN_GROUP_MESSAGE.to_string()),
            )
            .await;
        }
    };

    let retained = FormEcho::from_input(&input);
    match state
        .authoring
        .edit_post(user.id, &username, post_id, input)
        .await
    {
        Ok(EditOutcome::Saved(post)) => {
            Redirect::to(&format!("/{username}/{}/", post.id)).into_response()
        }
        Ok(EditOutcome::Denied { redirect }) => Redirect::to(&redirect).into_response(),
        Err(AuthoringError::Validation(message)) => {
            let params = NewFormParams::edit(&username, post_id).with_echo(retained);
            render_post_form(&state, &identity, params, Some(message)).await
        }
        Err(AuthoringError::NotFound) => render_not_found_response(identity.viewer()),
        Err(err) => authoring_failure("infra::http::authoring::update_post", &err),
    }
}

pub async fn add_comment(
    State(state): State<HttpState>,
    Extension(identity): Extension<Identity>,
    Path((username, post_id)): Path<(String, String)>,
    Form(form): Form<CommentForm>,
) -> Response {
    let Some(user) = identity.0.clone() else {
        return login_redirect(&format!("/{username}/{post_id}/"));
    };
    let Ok(post_id) = post_id.parse::<i64>() else {
        return render_not_found_response(identity.viewer());
    };

    match state
        .authoring
        .add_comment(user.id, &username, post_id, &form.text)
        .await
    {
        Ok(_) => Redirect::to(&format!("/{username}/{post_id}/")).into_response(),
        Err(AuthoringError::Validation(message)) => {
            // Re-render the detail page with the inline comment error.
            match state.feed.post_detail(&username, post_id).await {
                Ok(Some(mut content)) => {
                    content.comment_error = Some(message);
                    let view = LayoutContext::new(identity.viewer(), content);
                    render_template_response(PostTemplate { view }, StatusCode::OK)
                }
                Ok(None) => render_not_found_response(identity.viewer()),
                Err(err) => HttpError::from(err).into_response(),
            }
        }
        Err(AuthoringError::NotFound) => render_not_found_response(identity.viewer()),
        Err(err) => authoring_failure("infra::http::authoring::add_comment", &err),
    }
}

/// What the post form shows when it comes back to the user, either
/// pristine or echoing a rejected submission.
struct FormEcho {
    text: String,
    group_id: Option<i64>,
}

impl FormEcho {
    fn from_input(input: &PostInput) -> Self {
        Self {
            text: input.text.clone(),
            group_id: input.group_id,
        }
    }
}

struct NewFormParams {
    heading: &'static str,
    submit_label: &'static str,
    action_href: String,
    cancel_href: Option<String>,
    echo: FormEcho,
    current_image: Option<String>,
}

impl NewFormParams {
    fn create() -> Self {
        Self {
            heading: "New post",
            submit_label: "Publish",
            action_href: "/new/".to_string(),
            cancel_href: None,
            echo: FormEcho {
                text: String::new(),
                group_id: None,
            },
            current_image: None,
        }
    }

    fn edit(username: &str, post_id: i64) -> Self {
        Self {
            heading: "Edit post",
            submit_label: "Save",
            action_href: format!("/{username}/{post_id}/edit/"),
            cancel_href: Some(format!("/{username}/{post_id}/")),
            echo: FormEcho {
                text: String::new(),
                group_id: None,
            },
            current_image: None,
        }
    }

    fn with_echo(mut self, echo: FormEcho) -> Self {
        self.echo = echo;
        self
    }

    fn with_current_image(mut self, image_path: Option<&str>) -> Self {
        self.current_image = image_path.map(|path| format!("/media/{path}"));
        self
    }
}

async fn render_post_form(
    state: &HttpState,
    identity: &Identity,
    params: NewFormParams,
    error: Option<String>,
) -> Response {
    let groups = match state.groups.list_all().await {
        Ok(groups) => groups,
        Err(err) => {
            return repo_error_to_http("infra::http::authoring::render_post_form", err)
                .into_response();
        }
    };

    let options = groups
        .into_iter()
        .map(|group| GroupOption {
            id: group.id,
            title: group.title,
            selected: params.echo.group_id == Some(group.id),
        })
        .collect();

    let content = PostFormContext {
        heading: params.heading.to_string(),
        submit_label: params.submit_label.to_string(),
        action_href: params.action_href,
        text: params.echo.text,
        groups: options,
        error,
        current_image: params.current_image,
        cancel_href: params.cancel_href,
    };
    let view = LayoutContext::new(identity.viewer(), content);
    render_template_response(PostFormTemplate { view }, StatusCode::OK)
}

fn authoring_failure(source: &'static str, err: &AuthoringError) -> Response {
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error",
        err,
    )
    .into_response()
}
