use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::content::render::render_comment;
use crate::db::models::Comment;
use crate::error::{AppError, AppResult};
use crate::forms::PostForm;
use crate::pagination::{self, Page};

pub fn create(
    conn: &rusqlite::Connection,
    post_id: &str,
    author_id: &str,
    body: &str,
) -> AppResult<Comment> {
    create_at(conn, post_id, author_id, body, Utc::now())
}

pub fn create_at(
    conn: &rusqlite::Connection,
    post_id: &str,
    author_id: &str,
    body: &str,
    created_at: DateTime<Utc>,
) -> AppResult<Comment> {
    PostForm {
        body: body.to_string(),
    }
    .validate()
    .into_result()
    .map_err(AppError::Validation)?;

    let post_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    if !post_exists {
        return Err(AppError::NotFound);
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO comments (id, post_id, author_id, body, body_html, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, post_id, author_id, body, render_comment(body), created_at],
    )?;

    find(conn, &id)?.ok_or(AppError::NotFound)
}

pub fn find(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Comment>> {
    conn.query_row(
        &format!("{} WHERE c.id = ?1", Comment::SELECT),
        params![id],
        Comment::from_row,
    )
    .optional()
}

/// Comments on a post, oldest first.
pub fn for_post(
    conn: &rusqlite::Connection,
    post_id: &str,
    page: u32,
    per_page: u32,
) -> rusqlite::Result<Page<Comment>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);

    let total = pagination::count(
        conn,
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE c.post_id = ?1 ORDER BY c.created_at ASC, c.id ASC LIMIT ?2 OFFSET ?3",
        Comment::SELECT
    ))?;
    let items = stmt
        .query_map(params![post_id, limit, offset], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Page that holds the most recent comment, so a new comment lands in view.
pub fn last_page(conn: &rusqlite::Connection, post_id: &str, per_page: u32) -> rusqlite::Result<u32> {
    let total = pagination::count(
        conn,
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
    )?;
    if per_page == 0 || total == 0 {
        return Ok(1);
    }
    Ok(u32::try_from(total.div_ceil(u64::from(per_page))).unwrap_or(u32::MAX))
}

/// Every comment, newest first. The moderation queue.
pub fn all(conn: &rusqlite::Connection, page: u32, per_page: u32) -> rusqlite::Result<Page<Comment>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);

    let total = pagination::count(conn, "SELECT COUNT(*) FROM comments", [])?;
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY c.created_at DESC, c.id DESC LIMIT ?1 OFFSET ?2",
        Comment::SELECT
    ))?;
    let items = stmt
        .query_map(params![limit, offset], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Hide or restore a comment.
pub fn set_disabled(conn: &rusqlite::Connection, id: &str, disabled: bool) -> AppResult<()> {
    let updated = conn.execute(
        "UPDATE comments SET disabled = ?1 WHERE id = ?2",
        params![disabled, id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    tracing::info!(comment = %id, disabled, "Comment moderated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::posts;
    use crate::testing;
    use chrono::Duration;

    #[test]
    fn comment_html_uses_comment_allow_list() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let post = posts::create(&conn, &john.id, "hello").unwrap();

        let comment = create(&conn, &post.id, &john.id, "# big\n\n**nice**").unwrap();
        assert!(!comment.body_html.contains("<h1>"));
        assert!(comment.body_html.contains("<strong>nice</strong>"));
        assert!(!comment.disabled);
    }

    #[test]
    fn comment_on_missing_post_is_not_found() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        assert!(matches!(
            create(&conn, "missing", &john.id, "hi"),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn comments_list_oldest_first_and_count_on_post() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let post = posts::create(&conn, &john.id, "hello").unwrap();
        let start = Utc::now() - Duration::hours(1);
        for i in 0..3 {
            create_at(
                &conn,
                &post.id,
                &john.id,
                &format!("c{i}"),
                start + Duration::minutes(i),
            )
            .unwrap();
        }

        let page = for_post(&conn, &post.id, 1, 2).unwrap();
        let bodies: Vec<_> = page.items.iter().map(|c| c.body.as_str()).collect();
        assert_eq!(bodies, ["c0", "c1"]);
        assert_eq!(last_page(&conn, &post.id, 2).unwrap(), 2);

        let post = posts::find(&conn, &post.id).unwrap().unwrap();
        assert_eq!(post.comment_count, 3);

        let queue = all(&conn, 1, 10).unwrap();
        assert_eq!(queue.items[0].body, "c2");
    }

    #[test]
    fn moderation_toggles_disabled() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let post = posts::create(&conn, &john.id, "hello").unwrap();
        let comment = create(&conn, &post.id, &john.id, "rude").unwrap();

        set_disabled(&conn, &comment.id, true).unwrap();
        assert!(find(&conn, &comment.id).unwrap().unwrap().disabled);

        set_disabled(&conn, &comment.id, false).unwrap();
        assert!(!find(&conn, &comment.id).unwrap().unwrap().disabled);

        assert!(matches!(
            set_disabled(&conn, "missing", true),
            Err(AppError::NotFound)
        ));
    }
}
