//! The follow graph.
//!
//! Edges are `(follower_id, followed_id)`. Every user follows themselves so
//! that their own posts show up in the followed timeline; that self-edge is
//! hidden from the follower listings and counts, and never removed.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::models::Post;
use crate::pagination::{self, Page};

/// Another user on one end of an edge, with when the edge was made.
#[derive(Debug, Clone, Serialize)]
pub struct FollowEntry {
    pub user_id: String,
    pub username: String,
    pub avatar_hash: String,
    pub since: DateTime<Utc>,
}

/// Make `follower_id` follow `followed_id`. Following twice is a no-op.
pub fn follow(
    conn: &rusqlite::Connection,
    follower_id: &str,
    followed_id: &str,
) -> rusqlite::Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id, created_at) VALUES (?1, ?2, ?3)",
        params![follower_id, followed_id, Utc::now()],
    )?;
    if inserted > 0 {
        tracing::debug!(follower = %follower_id, followed = %followed_id, "Followed");
    }
    Ok(())
}

/// Drop the edge if present. The self-edge stays.
pub fn unfollow(
    conn: &rusqlite::Connection,
    follower_id: &str,
    followed_id: &str,
) -> rusqlite::Result<()> {
    if follower_id == followed_id {
        return Ok(());
    }
    let removed = conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
        params![follower_id, followed_id],
    )?;
    if removed > 0 {
        tracing::debug!(follower = %follower_id, followed = %followed_id, "Unfollowed");
    }
    Ok(())
}

pub fn is_following(
    conn: &rusqlite::Connection,
    follower_id: &str,
    followed_id: &str,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
        params![follower_id, followed_id],
        |row| row.get(0),
    )
}

pub fn is_followed_by(
    conn: &rusqlite::Connection,
    user_id: &str,
    follower_id: &str,
) -> rusqlite::Result<bool> {
    is_following(conn, follower_id, user_id)
}

/// How many others follow `user_id`.
pub fn follower_count(conn: &rusqlite::Connection, user_id: &str) -> rusqlite::Result<u64> {
    pagination::count(
        conn,
        "SELECT COUNT(*) FROM follows WHERE followed_id = ?1 AND follower_id != ?1",
        params![user_id],
    )
}

/// How many others `user_id` follows.
pub fn followed_count(conn: &rusqlite::Connection, user_id: &str) -> rusqlite::Result<u64> {
    pagination::count(
        conn,
        "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followed_id != ?1",
        params![user_id],
    )
}

/// Users following `user_id`, newest first.
pub fn followers(
    conn: &rusqlite::Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> rusqlite::Result<Page<FollowEntry>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);
    let total = follower_count(conn, user_id)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.avatar_hash, f.created_at
         FROM follows f JOIN users u ON u.id = f.follower_id
         WHERE f.followed_id = ?1 AND f.follower_id != ?1
         ORDER BY f.created_at DESC, u.username
         LIMIT ?2 OFFSET ?3",
    )?;
    let items = stmt
        .query_map(params![user_id, limit, offset], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Users `user_id` follows, newest first.
pub fn followed(
    conn: &rusqlite::Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> rusqlite::Result<Page<FollowEntry>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);
    let total = followed_count(conn, user_id)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, u.avatar_hash, f.created_at
         FROM follows f JOIN users u ON u.id = f.followed_id
         WHERE f.follower_id = ?1 AND f.followed_id != ?1
         ORDER BY f.created_at DESC, u.username
         LIMIT ?2 OFFSET ?3",
    )?;
    let items = stmt
        .query_map(params![user_id, limit, offset], entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Posts by everyone `user_id` follows, their own included, newest first.
pub fn followed_posts(
    conn: &rusqlite::Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> rusqlite::Result<Page<Post>> {
    let (page, limit, offset) = pagination::bounds(page, per_page);

    let total = pagination::count(
        conn,
        "SELECT COUNT(*) FROM posts p
         JOIN follows f ON f.followed_id = p.author_id
         WHERE f.follower_id = ?1",
        params![user_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "{} JOIN follows f ON f.followed_id = p.author_id
         WHERE f.follower_id = ?1
         ORDER BY p.created_at DESC, p.id DESC LIMIT ?2 OFFSET ?3",
        Post::SELECT
    ))?;
    let items = stmt
        .query_map(params![user_id, limit, offset], Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Give every user lacking one their self-edge. Returns how many were added.
pub fn add_self_follows(conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    let added = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id, created_at)
         SELECT id, id, member_since FROM users",
        [],
    )?;
    if added > 0 {
        tracing::info!(added, "Backfilled self-follows");
    }
    Ok(added)
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowEntry> {
    Ok(FollowEntry {
        user_id: row.get(0)?,
        username: row.get(1)?,
        avatar_hash: row.get(2)?,
        since: row.get(3)?,
    })
}
