use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::roles::Permission;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
    pub permissions: Permission,
}

impl Role {
    pub const COLUMNS: &'static str = "id, name, is_default, permissions";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_default: row.get(2)?,
            permissions: Permission::from_bits(row.get(3)?),
        })
    }
}

/// A user joined with its role. `password_hash` never leaves the crate in API responses.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub confirmed: bool,
    pub role_id: i64,
    pub role_name: String,
    pub permissions: Permission,
    pub name: Option<String>,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub avatar_hash: String,
    pub member_since: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// Column list matching `from_row`; expects `users u JOIN roles r`.
    pub const SELECT: &'static str = "SELECT u.id, u.email, u.username, u.password_hash, \
         u.confirmed, u.role_id, r.name, r.permissions, u.name, u.location, u.about_me, \
         u.avatar_hash, u.member_since, u.last_seen \
         FROM users u JOIN roles r ON r.id = u.role_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password_hash: row.get(3)?,
            confirmed: row.get(4)?,
            role_id: row.get(5)?,
            role_name: row.get(6)?,
            permissions: Permission::from_bits(row.get(7)?),
            name: row.get(8)?,
            location: row.get(9)?,
            about_me: row.get(10)?,
            avatar_hash: row.get(11)?,
            member_since: row.get(12)?,
            last_seen: row.get(13)?,
        })
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_administrator(&self) -> bool {
        self.can(Permission::ADMINISTER)
    }
}

/// A post with its author's display fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_avatar_hash: String,
    pub body: String,
    pub body_html: String,
    pub created_at: DateTime<Utc>,
    pub comment_count: i64,
}

impl Post {
    pub const SELECT: &'static str = "SELECT p.id, p.author_id, u.username, u.avatar_hash, \
         p.body, p.body_html, p.created_at, \
         (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) \
         FROM posts p JOIN users u ON u.id = p.author_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            author_id: row.get(1)?,
            author_username: row.get(2)?,
            author_avatar_hash: row.get(3)?,
            body: row.get(4)?,
            body_html: row.get(5)?,
            created_at: row.get(6)?,
            comment_count: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_username: String,
    pub author_avatar_hash: String,
    pub body: String,
    pub body_html: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub const SELECT: &'static str = "SELECT c.id, c.post_id, c.author_id, u.username, \
         u.avatar_hash, c.body, c.body_html, c.disabled, c.created_at \
         FROM comments c JOIN users u ON u.id = c.author_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            author_id: row.get(2)?,
            author_username: row.get(3)?,
            author_avatar_hash: row.get(4)?,
            body: row.get(5)?,
            body_html: row.get(6)?,
            disabled: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}
