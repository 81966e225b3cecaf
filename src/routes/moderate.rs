use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::auth::Principal;
use crate::content::comments;
use crate::error::AppResult;
use crate::roles::Permission;
use crate::routes::home::Html;
use crate::routes::views::{CommentView, Pager, Viewer};
use crate::routes::PageQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/moderate", get(queue))
        .route("/moderate/enable/{id}", post(enable))
        .route("/moderate/disable/{id}", post(disable))
}

#[derive(Template)]
#[template(path = "pages/moderate.html")]
pub struct ModerateTemplate {
    pub viewer: Viewer,
    pub comments: Vec<CommentView>,
    pub pager: Pager,
    pub moderating: bool,
}

/// GET /moderate: Every comment, newest first.
pub async fn queue(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    principal.require(Permission::MODERATE_COMMENTS)?;
    let conn = state.db.get()?;
    let listing = comments::all(&conn, query.page(), state.config.content.comments_per_page)?;

    Ok(Html(ModerateTemplate {
        viewer: Viewer::new(&principal),
        pager: Pager::new(&listing, "/moderate"),
        moderating: true,
        comments: listing.items.into_iter().map(CommentView::from).collect(),
    })
    .into_response())
}

/// POST /moderate/enable/{id}
pub async fn enable(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    set_disabled(&state, &principal, &id, false, query.page())
}

/// POST /moderate/disable/{id}
pub async fn disable(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    set_disabled(&state, &principal, &id, true, query.page())
}

fn set_disabled(
    state: &AppState,
    principal: &Principal,
    id: &str,
    disabled: bool,
    page: u32,
) -> AppResult<Response> {
    principal.require(Permission::MODERATE_COMMENTS)?;
    let conn = state.db.get()?;
    comments::set_disabled(&conn, id, disabled)?;
    Ok(Redirect::to(&format!("/moderate?page={page}")).into_response())
}
