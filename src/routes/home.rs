use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::Form;

use crate::auth::{CurrentUser, Principal};
use crate::content::posts;
use crate::error::{AppError, AppResult};
use crate::extractors::cookie_value;
use crate::follows;
use crate::forms::{FieldErrors, PostForm};
use crate::roles::Permission;
use crate::routes::views::{Pager, PostView, Viewer};
use crate::routes::PageQuery;
use crate::state::AppState;

pub const SHOW_FOLLOWED_COOKIE: &str = "show_followed";
const SHOW_FOLLOWED_MAX_AGE: u64 = 30 * 24 * 3600;

#[derive(Template)]
#[template(path = "pages/index.html")]
pub struct IndexTemplate {
    pub viewer: Viewer,
    pub show_followed: bool,
    pub posts: Vec<PostView>,
    pub pager: Pager,
    pub body: String,
    pub errors: FieldErrors,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// GET /: All posts, or only followed ones when the toggle cookie is set.
pub async fn index(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    render_index(
        &state,
        &principal,
        &headers,
        query.page(),
        String::new(),
        FieldErrors::new(),
    )
}

/// POST /: Publish a post from the index form.
pub async fn create_post(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let user = principal.require(Permission::WRITE_ARTICLES)?;

    let result = {
        let conn = state.db.get()?;
        posts::create(&conn, &user.id, &form.body)
    };
    match result {
        Ok(_) => Ok(Redirect::to("/").into_response()),
        Err(AppError::Validation(errors)) => {
            render_index(&state, &principal, &headers, 1, form.body, errors)
        }
        Err(e) => Err(e),
    }
}

/// GET /all
pub async fn show_all(_user: CurrentUser) -> Response {
    toggle_followed(false)
}

/// GET /followed
pub async fn show_followed(_user: CurrentUser) -> Response {
    toggle_followed(true)
}

fn toggle_followed(on: bool) -> Response {
    let value = if on { "1" } else { "" };
    let cookie = format!(
        "{SHOW_FOLLOWED_COOKIE}={value}; Path=/; SameSite=Lax; Max-Age={SHOW_FOLLOWED_MAX_AGE}"
    );
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to("/"),
    )
        .into_response()
}

fn render_index(
    state: &AppState,
    principal: &Principal,
    headers: &HeaderMap,
    page: u32,
    body: String,
    errors: FieldErrors,
) -> AppResult<Response> {
    let viewer = Viewer::new(principal);
    let per_page = state.config.content.posts_per_page;
    let conn = state.db.get()?;

    let show_followed = principal.is_authenticated()
        && cookie_value(headers, SHOW_FOLLOWED_COOKIE).is_some_and(|v| !v.is_empty());
    let listing = match principal.user() {
        Some(user) if show_followed => follows::followed_posts(&conn, &user.id, page, per_page)?,
        _ => posts::list(&conn, page, per_page)?,
    };

    let pager = Pager::new(&listing, "/");
    let posts = listing
        .items
        .into_iter()
        .map(|post| PostView::new(post, &viewer))
        .collect();

    Ok(Html(IndexTemplate {
        viewer,
        show_followed,
        posts,
        pager,
        body,
        errors,
    })
    .into_response())
}
