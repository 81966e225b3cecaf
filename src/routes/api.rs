//! JSON API under `/api/v1`.
//!
//! Callers authenticate with `Authorization: Bearer <token>`, where the token
//! comes from `POST /tokens`. Errors are JSON objects.

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::accounts::users;
use crate::auth::{CurrentUser, Principal};
use crate::content::{comments, posts};
use crate::db::models::{Comment, Post, User};
use crate::error::AppError;
use crate::extractors::bearer_token;
use crate::follows;
use crate::pagination::Page;
use crate::roles::Permission;
use crate::routes::PageQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tokens", post(new_token))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post).put(edit_post))
        .route(
            "/posts/{id}/comments",
            get(post_comments).post(create_comment),
        )
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/posts", get(user_posts))
        .route("/users/{id}/timeline", get(user_timeline))
}

/// `AppError` rendered as `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError(err.into())
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            // No redirects in the API
            AppError::Unconfirmed => StatusCode::FORBIDDEN,
            ref other => other.status(),
        };
        let body = json!({
            "error": status.canonical_reason().unwrap_or("error").to_lowercase(),
            "message": self.0.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A bearer-authenticated, confirmed caller. The browser session cookie is
/// never consulted here.
#[derive(Debug, Clone)]
pub struct ApiCaller(pub Principal);

impl FromRequestParts<AppState> for ApiCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Err(AppError::Unauthorized.into());
        };
        let conn = state.db.get()?;
        let Some(user) = state.accounts.verify_api_token(&conn, token)? else {
            return Err(AppError::Unauthorized.into());
        };
        if !user.confirmed {
            return Err(AppError::Unconfirmed.into());
        }
        users::ping(&conn, &user.id)?;

        let principal = Principal::Authenticated(CurrentUser::from(user));
        parts.extensions.insert(principal.clone());
        Ok(ApiCaller(principal))
    }
}

// -- Wire shapes --

#[derive(Debug, Serialize)]
pub struct ApiPost {
    pub id: String,
    pub url: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: DateTime<Utc>,
    pub author_url: String,
    pub author: String,
    pub comments_url: String,
    pub comment_count: i64,
}

impl From<Post> for ApiPost {
    fn from(post: Post) -> Self {
        Self {
            url: format!("/api/v1/posts/{}", post.id),
            author_url: format!("/api/v1/users/{}", post.author_id),
            comments_url: format!("/api/v1/posts/{}/comments", post.id),
            id: post.id,
            body: post.body,
            body_html: post.body_html,
            timestamp: post.created_at,
            author: post.author_username,
            comment_count: post.comment_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiComment {
    pub id: String,
    pub post_url: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: DateTime<Utc>,
    pub author_url: String,
    pub author: String,
    pub disabled: bool,
}

impl From<Comment> for ApiComment {
    fn from(comment: Comment) -> Self {
        // Moderated comments keep their slot but lose their text.
        let (body, body_html) = if comment.disabled {
            (String::new(), String::new())
        } else {
            (comment.body, comment.body_html)
        };
        Self {
            post_url: format!("/api/v1/posts/{}", comment.post_id),
            author_url: format!("/api/v1/users/{}", comment.author_id),
            id: comment.id,
            body,
            body_html,
            timestamp: comment.created_at,
            author: comment.author_username,
            disabled: comment.disabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiUser {
    pub id: String,
    pub url: String,
    pub username: String,
    pub member_since: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub posts_url: String,
    pub timeline_url: String,
    pub post_count: u64,
}

#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub count: u64,
}

impl<T> Listing<T> {
    fn new<S>(page: Page<S>, path: &str) -> Self
    where
        T: From<S>,
    {
        let prev = page
            .has_prev()
            .then(|| format!("{path}?page={}", page.prev_num()));
        let next = page
            .has_next()
            .then(|| format!("{path}?page={}", page.next_num()));
        let count = page.total;
        Self {
            items: page.items.into_iter().map(T::from).collect(),
            prev,
            next,
            count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expiration: u64,
}

#[derive(Debug, Deserialize)]
pub struct BodyRequest {
    pub body: String,
}

// -- Handlers --

/// POST /tokens: Trade credentials for a bearer token.
pub async fn new_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let conn = state.db.get()?;
    let user = match state.accounts.authenticate(&conn, &req.email, &req.password) {
        Ok(user) => user,
        Err(AppError::Validation(_)) => return Err(AppError::Unauthorized.into()),
        Err(e) => return Err(e.into()),
    };
    if !user.confirmed {
        return Err(AppError::Unconfirmed.into());
    }

    Ok(Json(TokenResponse {
        token: state.accounts.issue_api_token(&user.id),
        expiration: state.accounts.settings().token_ttl_secs,
    }))
}

/// GET /posts
pub async fn list_posts(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Listing<ApiPost>>> {
    let conn = state.db.get()?;
    let page = posts::list(&conn, query.page(), state.config.content.posts_per_page)?;
    Ok(Json(Listing::new(page, "/api/v1/posts")))
}

/// POST /posts
pub async fn create_post(
    State(state): State<AppState>,
    ApiCaller(principal): ApiCaller,
    Json(req): Json<BodyRequest>,
) -> ApiResult<Response> {
    let user = principal.require(Permission::WRITE_ARTICLES)?;
    let conn = state.db.get()?;
    let post = ApiPost::from(posts::create(&conn, &user.id, &req.body)?);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, post.url.clone())],
        Json(post),
    )
        .into_response())
}

/// GET /posts/{id}
pub async fn get_post(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiPost>> {
    let conn = state.db.get()?;
    let post = posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(post.into()))
}

/// PUT /posts/{id}
pub async fn edit_post(
    State(state): State<AppState>,
    ApiCaller(principal): ApiCaller,
    Path(id): Path<String>,
    Json(req): Json<BodyRequest>,
) -> ApiResult<Json<ApiPost>> {
    let user = principal.require(Permission::WRITE_ARTICLES)?;
    let conn = state.db.get()?;
    let post = posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    if !posts::can_edit(user, &post) {
        return Err(AppError::Forbidden.into());
    }

    let post = posts::update_body(&conn, &post.id, &req.body)?;
    Ok(Json(post.into()))
}

/// GET /posts/{id}/comments
pub async fn post_comments(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Listing<ApiComment>>> {
    let conn = state.db.get()?;
    posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    let page = comments::for_post(
        &conn,
        &id,
        query.page(),
        state.config.content.comments_per_page,
    )?;
    Ok(Json(Listing::new(
        page,
        &format!("/api/v1/posts/{id}/comments"),
    )))
}

/// POST /posts/{id}/comments
pub async fn create_comment(
    State(state): State<AppState>,
    ApiCaller(principal): ApiCaller,
    Path(id): Path<String>,
    Json(req): Json<BodyRequest>,
) -> ApiResult<Response> {
    let user = principal.require(Permission::COMMENT)?;
    let conn = state.db.get()?;
    let comment = ApiComment::from(comments::create(&conn, &id, &user.id, &req.body)?);

    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiUser>> {
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &id)?.ok_or(AppError::NotFound)?;
    let post_count = posts::by_author(&conn, &user.id, 1, 0)?.total;
    Ok(Json(api_user(user, post_count)))
}

/// GET /users/{id}/posts
pub async fn user_posts(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Listing<ApiPost>>> {
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &id)?.ok_or(AppError::NotFound)?;
    let page = posts::by_author(
        &conn,
        &user.id,
        query.page(),
        state.config.content.posts_per_page,
    )?;
    Ok(Json(Listing::new(page, &format!("/api/v1/users/{id}/posts"))))
}

/// GET /users/{id}/timeline: Posts from everyone the user follows.
pub async fn user_timeline(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Listing<ApiPost>>> {
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &id)?.ok_or(AppError::NotFound)?;
    let page = follows::followed_posts(
        &conn,
        &user.id,
        query.page(),
        state.config.content.posts_per_page,
    )?;
    Ok(Json(Listing::new(
        page,
        &format!("/api/v1/users/{id}/timeline"),
    )))
}

fn api_user(user: User, post_count: u64) -> ApiUser {
    ApiUser {
        url: format!("/api/v1/users/{}", user.id),
        posts_url: format!("/api/v1/users/{}/posts", user.id),
        timeline_url: format!("/api/v1/users/{}/timeline", user.id),
        id: user.id,
        username: user.username,
        member_since: user.member_since,
        last_seen: user.last_seen,
        post_count,
    }
}
