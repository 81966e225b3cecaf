use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::accounts::{conflict, users};
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::forms::{normalize_email, EditProfileAdminForm, EditProfileForm};
use crate::roles;

/// Hex SHA-256 of the normalized address, as used by the avatar service.
pub fn avatar_hash(email: &str) -> String {
    hex::encode(Sha256::digest(normalize_email(email).as_bytes()))
}

pub fn gravatar_url(hash: &str, size: u32) -> String {
    format!("https://secure.gravatar.com/avatar/{hash}?s={size}&d=identicon&r=g")
}

/// A user's own profile edit.
pub fn edit_profile(
    conn: &rusqlite::Connection,
    user_id: &str,
    form: &EditProfileForm,
) -> AppResult<User> {
    form.validate().into_result().map_err(AppError::Validation)?;

    let updated = conn.execute(
        "UPDATE users SET name = ?1, location = ?2, about_me = ?3 WHERE id = ?4",
        params![
            optional(&form.name),
            optional(&form.location),
            optional(&form.about_me),
            user_id
        ],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }

    users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)
}

/// Administrator edit of any account, identity fields included.
pub fn admin_edit_profile(
    conn: &rusqlite::Connection,
    user_id: &str,
    form: &EditProfileAdminForm,
) -> AppResult<User> {
    let mut errors = form.validate();
    let email = normalize_email(&form.email);
    let username = form.username.trim();

    if errors.get("email").is_empty() {
        if let Some(other) = users::find_by_email(conn, &email)? {
            if other.id != user_id {
                errors.add("email", "Email already registered.");
            }
        }
    }
    if errors.get("username").is_empty() {
        if let Some(other) = users::find_by_username(conn, username)? {
            if other.id != user_id {
                errors.add("username", "Username already in use.");
            }
        }
    }
    if roles::find_by_id(conn, form.role)?.is_none() {
        errors.add("role", "Not a valid choice.");
    }
    errors.into_result().map_err(AppError::Validation)?;

    // Email and avatar hash move together.
    let updated = conn
        .execute(
            "UPDATE users SET email = ?1, avatar_hash = ?2, username = ?3, confirmed = ?4, \
             role_id = ?5, name = ?6, location = ?7, about_me = ?8 WHERE id = ?9",
            params![
                email,
                avatar_hash(&email),
                username,
                form.is_confirmed(),
                form.role,
                optional(&form.name),
                optional(&form.location),
                optional(&form.about_me),
                user_id
            ],
        )
        .map_err(conflict)?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    tracing::info!(user = %user_id, "Profile updated by administrator");

    users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)
}

fn optional(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn admin_form(user: &User) -> EditProfileAdminForm {
        EditProfileAdminForm {
            email: user.email.clone(),
            username: user.username.clone(),
            confirmed: user.confirmed.then(|| "on".to_string()),
            role: user.role_id,
            name: String::new(),
            location: String::new(),
            about_me: String::new(),
        }
    }

    #[test]
    fn avatar_hash_ignores_case_and_whitespace() {
        assert_eq!(avatar_hash("John@Example.com "), avatar_hash("john@example.com"));
        assert_eq!(avatar_hash("john@example.com").len(), 64);
    }

    #[test]
    fn gravatar_url_shape() {
        assert_eq!(
            gravatar_url("abc", 40),
            "https://secure.gravatar.com/avatar/abc?s=40&d=identicon&r=g"
        );
    }

    #[test]
    fn edit_profile_stores_blank_as_null() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");

        let updated = edit_profile(
            &conn,
            &john.id,
            &EditProfileForm {
                name: "John Doe".into(),
                location: "  ".into(),
                about_me: "Hi".into(),
            },
        )
        .unwrap();
        assert_eq!(updated.name.as_deref(), Some("John Doe"));
        assert_eq!(updated.location, None);
        assert_eq!(updated.about_me.as_deref(), Some("Hi"));
    }

    #[test]
    fn admin_edit_recomputes_avatar_with_email() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");

        let mut form = admin_form(&john);
        form.email = "Johnny@Example.com".into();
        let updated = admin_edit_profile(&conn, &john.id, &form).unwrap();

        assert_eq!(updated.email, "johnny@example.com");
        assert_eq!(updated.avatar_hash, avatar_hash("johnny@example.com"));
    }

    #[test]
    fn admin_edit_rejects_taken_identity() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let susan = testing::user(&conn, "susan");

        let mut form = admin_form(&john);
        form.email = susan.email.clone();
        form.username = "susan".into();
        let Err(AppError::Validation(errors)) = admin_edit_profile(&conn, &john.id, &form) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.first("email"), "Email already registered.");
        assert_eq!(errors.first("username"), "Username already in use.");

        // Keeping one's own identity is fine
        assert!(admin_edit_profile(&conn, &john.id, &admin_form(&john)).is_ok());
    }

    #[test]
    fn admin_edit_rejects_unknown_role() {
        let conn = testing::conn();
        let john = testing::user(&conn, "john");
        let mut form = admin_form(&john);
        form.role = 9999;
        assert!(matches!(
            admin_edit_profile(&conn, &john.id, &form),
            Err(AppError::Validation(_))
        ));
    }
}
