use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::accounts::profile::avatar_hash;
use crate::db::models::User;

/// Columns for a brand-new account. `email` is expected normalized.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role_id: i64,
    pub confirmed: bool,
}

/// Insert the user and its self-follow edge in one transaction.
pub fn insert(conn: &rusqlite::Connection, new: &NewUser<'_>) -> rusqlite::Result<User> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = Utc::now();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users (id, email, username, password_hash, confirmed, role_id, \
         avatar_hash, member_since, last_seen) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            new.email,
            new.username,
            new.password_hash,
            new.confirmed,
            new.role_id,
            avatar_hash(new.email),
            now
        ],
    )?;
    tx.execute(
        "INSERT INTO follows (follower_id, followed_id, created_at) VALUES (?1, ?1, ?2)",
        params![id, now],
    )?;
    tx.commit()?;

    find_by_id(conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn find_by_id(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("{} WHERE u.id = ?1", User::SELECT),
        params![id],
        User::from_row,
    )
    .optional()
}

pub fn find_by_email(conn: &rusqlite::Connection, email: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("{} WHERE u.email = ?1", User::SELECT),
        params![email],
        User::from_row,
    )
    .optional()
}

pub fn find_by_username(
    conn: &rusqlite::Connection,
    username: &str,
) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("{} WHERE u.username = ?1", User::SELECT),
        params![username],
        User::from_row,
    )
    .optional()
}

pub fn set_password_hash(
    conn: &rusqlite::Connection,
    id: &str,
    password_hash: &str,
) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![password_hash, id],
    )?;
    Ok(updated > 0)
}

/// Record activity. Called on every authenticated request.
pub fn ping(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET last_seen = ?1 WHERE id = ?2",
        params![Utc::now(), id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{follows, roles, testing};

    #[test]
    fn insert_creates_user_and_self_follow() {
        let conn = testing::conn();
        let role = roles::default_role(&conn).unwrap().unwrap();
        let user = insert(
            &conn,
            &NewUser {
                email: "john@example.com",
                username: "john",
                password_hash: "x",
                role_id: role.id,
                confirmed: false,
            },
        )
        .unwrap();

        assert_eq!(user.role_name, roles::USER_ROLE);
        assert!(!user.confirmed);
        assert_eq!(user.avatar_hash, avatar_hash("john@example.com"));
        assert!(follows::is_following(&conn, &user.id, &user.id).unwrap());
    }

    #[test]
    fn lookups_find_the_same_user() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");

        let by_email = find_by_email(&conn, &john.email).unwrap().unwrap();
        let by_name = find_by_username(&conn, "john").unwrap().unwrap();
        assert_eq!(by_email.id, john.id);
        assert_eq!(by_name.id, john.id);
        assert!(find_by_id(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn ping_moves_last_seen_forward() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        conn.execute(
            "UPDATE users SET last_seen = '2000-01-01 00:00:00+00:00' WHERE id = ?1",
            params![john.id],
        )
        .unwrap();

        ping(&conn, &john.id).unwrap();
        let john = find_by_id(&conn, &john.id).unwrap().unwrap();
        let cutoff: chrono::DateTime<Utc> = "2001-01-01T00:00:00Z".parse().unwrap();
        assert!(john.last_seen > cutoff);
    }
}
