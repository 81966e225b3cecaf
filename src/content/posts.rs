use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::auth::principal::CurrentUser;
use crate::content::render::render_post;
use crate::db::models::Post;
use crate::error::{AppError, AppResult};
use crate::forms::PostForm;
use crate::pagination::{self, Page};

pub fn create(conn: &rusqlite::Connection, author_id: &str, body: &str) -> AppResult<Post> {
    create_at(conn, author_id, body, Utc::now())
}

pub fn create_at(
    conn: &rusqlite::Connection,
    author_id: &str,
    body: &str,
    created_at: DateTime<Utc>,
) -> AppResult<Post> {
    validate_body(body)?;

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO posts (id, author_id, body, body_html, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, author_id, body, render_post(body), created_at],
    )?;
    tracing::debug!(post = %id, author = %author_id, "Created post");

    find(conn, &id)?.ok_or(AppError::NotFound)
}

/// Replace the body and its rendering together.
pub fn update_body(conn: &rusqlite::Connection, post_id: &str, body: &str) -> AppResult<Post> {
    validate_body(body)?;

    let updated = conn.execute(
        "UPDATE posts SET body = ?1, body_html = ?2 WHERE id = ?3",
        params![body, render_post(body), post_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    find(conn, post_id)?.ok_or(AppError::NotFound)
}

/// Authors edit their own posts; administrators edit any.
pub fn can_edit(user: &CurrentUser, post: &Post) -> bool {
    user.id == post.author_id || user.is_administrator()
}

pub fn find(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("{} WHERE p.id = ?1", Post::SELECT),
        params![id],
        Post::from_row,
    )
    .optional()
}

/// Every post, newest first.
pub fn list(conn: &rusqlite::Connection, page: u32, per_page: u32) -> rusqlite::Result<Page<Post>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);

    let total = pagination::count(conn, "SELECT COUNT(*) FROM posts", [])?;
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY p.created_at DESC, p.id DESC LIMIT ?1 OFFSET ?2",
        Post::SELECT
    ))?;
    let items = stmt
        .query_map(params![limit, offset], Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Posts by one author, newest first.
pub fn by_author(
    conn: &rusqlite::Connection,
    author_id: &str,
    page: u32,
    per_page: u32,
) -> rusqlite::Result<Page<Post>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);

    let total = pagination::count(
        conn,
        "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
        params![author_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE p.author_id = ?1 ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3",
        Post::SELECT
    ))?;
    let items = stmt
        .query_map(params![author_id, limit, offset], Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

fn validate_body(body: &str) -> AppResult<()> {
    PostForm {
        body: body.to_string(),
    }
    .validate()
    .into_result()
    .map_err(AppError::Validation)
}
