//! Fixtures shared by unit tests.

use std::sync::{Arc, OnceLock};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;

use crate::accounts::users::{self, NewUser};
use crate::accounts::{AccountSettings, Accounts};
use crate::auth::password::hash_password;
use crate::auth::tokens::TokenCodec;
use crate::config::MailConfig;
use crate::db::{self, models::User};
use crate::mail::MemoryMailer;
use crate::roles;

pub const PASSWORD: &str = "cat";
pub const ADMIN_EMAIL: &str = "admin@example.com";

/// Migrated, seeded in-memory database. The pool lives as long as the connection.
pub fn conn() -> PooledConnection<SqliteConnectionManager> {
    let pool = db::memory_pool().unwrap();
    let conn = pool.get().unwrap();
    db::migrate(&conn).unwrap();
    roles::insert_roles(&conn).unwrap();
    conn
}

pub fn accounts(outbox: Arc<MemoryMailer>) -> Accounts {
    Accounts::new(
        TokenCodec::new(b"test secret".to_vec()),
        outbox,
        AccountSettings {
            bcrypt_cost: 4,
            token_ttl_secs: 3600,
            admin_email: Some(ADMIN_EMAIL.to_string()),
            public_url: "http://localhost:3000".to_string(),
            mail: MailConfig::default(),
        },
    )
}

/// Confirmed user `<username>@example.com` with the default role.
pub fn user(conn: &rusqlite::Connection, username: &str) -> User {
    let role = roles::default_role(conn).unwrap().unwrap();
    insert(conn, username, role.id, true)
}

pub fn unconfirmed(conn: &rusqlite::Connection, username: &str) -> User {
    let role = roles::default_role(conn).unwrap().unwrap();
    insert(conn, username, role.id, false)
}

pub fn admin(conn: &rusqlite::Connection, username: &str) -> User {
    let role = roles::find_by_name(conn, roles::ADMINISTRATOR_ROLE)
        .unwrap()
        .unwrap();
    insert(conn, username, role.id, true)
}

fn insert(conn: &rusqlite::Connection, username: &str, role_id: i64, confirmed: bool) -> User {
    users::insert(
        conn,
        &NewUser {
            email: &format!("{username}@example.com"),
            username,
            password_hash: password_hash(),
            role_id,
            confirmed,
        },
    )
    .unwrap()
}

fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD, 4).unwrap())
}
