use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};

use crate::auth::Principal;
use crate::content::{comments, posts};
use crate::error::{AppError, AppResult};
use crate::forms::{FieldErrors, PostForm};
use crate::roles::Permission;
use crate::routes::home::Html;
use crate::routes::views::{CommentView, Pager, PostView, Viewer};
use crate::routes::PageQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post/{id}", get(post_page).post(add_comment))
        .route("/edit/{id}", get(edit_page).post(edit))
}

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub viewer: Viewer,
    pub post: PostView,
    pub comments: Vec<CommentView>,
    pub pager: Pager,
    /// Shows enable/disable controls next to each comment.
    pub moderating: bool,
    pub body: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "pages/edit_post.html")]
pub struct EditPostTemplate {
    pub viewer: Viewer,
    pub post_id: String,
    pub body: String,
    pub errors: FieldErrors,
}

/// GET /post/{id}
pub async fn post_page(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    render_post(
        &state,
        &principal,
        &id,
        query.page(),
        String::new(),
        FieldErrors::new(),
    )
}

/// POST /post/{id}: Comment on the post, then jump to the newest comment.
pub async fn add_comment(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let user = principal.require(Permission::COMMENT)?;

    let result = {
        let conn = state.db.get()?;
        comments::create(&conn, &id, &user.id, &form.body).and_then(|_| {
            comments::last_page(&conn, &id, state.config.content.comments_per_page)
                .map_err(AppError::from)
        })
    };
    match result {
        Ok(page) => Ok(Redirect::to(&format!("/post/{id}?page={page}#comments")).into_response()),
        Err(AppError::Validation(errors)) => {
            render_post(&state, &principal, &id, 1, form.body, errors)
        }
        Err(e) => Err(e),
    }
}

fn render_post(
    state: &AppState,
    principal: &Principal,
    id: &str,
    page: u32,
    body: String,
    errors: FieldErrors,
) -> AppResult<Response> {
    let viewer = Viewer::new(principal);
    let conn = state.db.get()?;
    let post = posts::find(&conn, id)?.ok_or(AppError::NotFound)?;

    let listing = comments::for_post(&conn, id, page, state.config.content.comments_per_page)?;
    let pager = Pager::new(&listing, &format!("/post/{id}"));

    Ok(Html(PostTemplate {
        post: PostView::new(post, &viewer),
        comments: listing.items.into_iter().map(CommentView::from).collect(),
        viewer,
        pager,
        moderating: false,
        body,
        errors,
    })
    .into_response())
}

/// GET /edit/{id}
pub async fn edit_page(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let user = principal.signed_in()?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    if !posts::can_edit(user, &post) {
        return Err(AppError::Forbidden);
    }

    Ok(Html(EditPostTemplate {
        viewer: Viewer::new(&principal),
        post_id: post.id,
        body: post.body,
        errors: FieldErrors::new(),
    })
    .into_response())
}

/// POST /edit/{id}
pub async fn edit(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let user = principal.signed_in()?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    if !posts::can_edit(user, &post) {
        return Err(AppError::Forbidden);
    }

    match posts::update_body(&conn, &post.id, &form.body) {
        Ok(post) => {
            tracing::info!(post = %post.id, editor = %user.username, "Post updated");
            Ok(Redirect::to(&format!("/post/{}", post.id)).into_response())
        }
        Err(AppError::Validation(errors)) => Ok(Html(EditPostTemplate {
            viewer: Viewer::new(&principal),
            post_id: post.id,
            body: form.body,
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}
