use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::db::models::User;

/// Create a new session for a user. Returns the session token.
pub fn create_session(
    conn: &rusqlite::Connection,
    user_id: &str,
    hours: u64,
) -> rusqlite::Result<String> {
    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Delete a session by token.
pub fn delete_session(conn: &rusqlite::Connection, token: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// The user behind an unexpired session token.
pub fn session_user(conn: &rusqlite::Connection, token: &str) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!(
            "{} JOIN sessions s ON s.user_id = u.id \
             WHERE s.token = ?1 AND s.expires_at > datetime('now')",
            User::SELECT
        ),
        params![token],
        User::from_row,
    )
    .optional()
}

/// Drop expired sessions. Returns how many were removed.
pub fn purge_expired(conn: &rusqlite::Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= datetime('now')",
        [],
    )
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn session_resolves_until_deleted() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");

        let token = create_session(&conn, &john.id, 1).unwrap();
        let user = session_user(&conn, &token).unwrap().unwrap();
        assert_eq!(user.id, john.id);

        delete_session(&conn, &token).unwrap();
        assert!(session_user(&conn, &token).unwrap().is_none());
    }

    #[test]
    fn expired_sessions_do_not_resolve() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let token = create_session(&conn, &john.id, 1).unwrap();
        conn.execute(
            "UPDATE sessions SET expires_at = datetime('now', '-1 hours')",
            [],
        )
        .unwrap();

        assert!(session_user(&conn, &token).unwrap().is_none());
        assert_eq!(purge_expired(&conn).unwrap(), 1);
    }
}
