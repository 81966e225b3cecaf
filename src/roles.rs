//! Permission bits and the seeded roles.
//!
//! A role grants a set of permissions as a bitmask. Authorization is always
//! `granted & requested == requested`; bits are never subtracted at check time.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::Role;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Self = Self(0);
    pub const FOLLOW: Self = Self(0x01);
    pub const COMMENT: Self = Self(0x02);
    pub const WRITE_ARTICLES: Self = Self(0x04);
    pub const MODERATE_COMMENTS: Self = Self(0x08);
    pub const ADMINISTER: Self = Self(0x80);
    pub const ALL: Self = Self(0xff);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `requested` is granted.
    pub const fn contains(self, requested: Self) -> bool {
        self.0 & requested.0 == requested.0
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

pub const USER_ROLE: &str = "User";
pub const MODERATOR_ROLE: &str = "Moderator";
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

/// (name, permissions, is_default)
pub fn seed_roles() -> [(&'static str, Permission, bool); 3] {
    let user = Permission::FOLLOW | Permission::COMMENT | Permission::WRITE_ARTICLES;
    [
        (USER_ROLE, user, true),
        (MODERATOR_ROLE, user | Permission::MODERATE_COMMENTS, false),
        (ADMINISTRATOR_ROLE, Permission::ALL, false),
    ]
}

/// Create or refresh the seeded roles. Safe to run on every start.
pub fn insert_roles(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;

    // Clear the flag first so the single-default index never sees two rows.
    tx.execute("UPDATE roles SET is_default = 0", [])?;

    for (name, permissions, is_default) in seed_roles() {
        tx.execute(
            "INSERT INTO roles (name, is_default, permissions) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
               is_default = excluded.is_default,
               permissions = excluded.permissions",
            params![name, is_default, permissions.bits()],
        )?;
    }

    tx.commit()?;
    tracing::debug!("Seeded roles");
    Ok(())
}

pub fn default_role(conn: &rusqlite::Connection) -> rusqlite::Result<Option<Role>> {
    conn.query_row(
        &format!("SELECT {} FROM roles WHERE is_default = 1", Role::COLUMNS),
        [],
        Role::from_row,
    )
    .optional()
}

pub fn find_by_name(conn: &rusqlite::Connection, name: &str) -> rusqlite::Result<Option<Role>> {
    conn.query_row(
        &format!("SELECT {} FROM roles WHERE name = ?1", Role::COLUMNS),
        params![name],
        Role::from_row,
    )
    .optional()
}

pub fn find_by_id(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<Role>> {
    conn.query_row(
        &format!("SELECT {} FROM roles WHERE id = ?1", Role::COLUMNS),
        params![id],
        Role::from_row,
    )
    .optional()
}

pub fn list(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<Role>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM roles ORDER BY name",
        Role::COLUMNS
    ))?;
    let roles = stmt
        .query_map([], Role::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roles)
}
