//! Account lifecycle: registration, confirmation, credentials and email.
//!
//! [`Accounts`] carries what these transitions need besides a connection:
//! the token codec, the mail transport and a few settings. Handlers get it
//! from the application state; tests build one around a [`MemoryMailer`].
//!
//! [`MemoryMailer`]: crate::mail::MemoryMailer

pub mod profile;
pub mod users;

use std::sync::Arc;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::tokens::{TokenCodec, TokenPurpose};
use crate::config::{Config, MailConfig};
use crate::db::{
    self,
    models::{Role, User},
};
use crate::error::{AppError, AppResult};
use crate::forms::{check_email, check_new_password, normalize_email, FieldErrors, RegistrationForm};
use crate::mail::{
    send_email, ChangeEmailMail, ConfirmMail, Email, MailTemplate, Mailer, NewUserMail,
    ResetPasswordMail,
};
use crate::roles;

use users::NewUser;

/// What an account token vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
}

impl TokenClaims {
    fn user(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            new_email: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub bcrypt_cost: u32,
    pub token_ttl_secs: u64,
    /// Normalized. Registrations with this address become administrators.
    pub admin_email: Option<String>,
    /// Base URL for links in outgoing mail, no trailing slash.
    pub public_url: String,
    pub mail: MailConfig,
}

impl AccountSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bcrypt_cost: config.auth.bcrypt_cost,
            token_ttl_secs: config.auth.token_ttl_secs,
            admin_email: config.auth.admin_email.as_deref().map(normalize_email),
            public_url: config.public_url(),
            mail: config.mail.clone(),
        }
    }
}

pub struct Accounts {
    tokens: TokenCodec,
    mailer: Arc<dyn Mailer>,
    settings: AccountSettings,
}

impl Accounts {
    pub fn new(tokens: TokenCodec, mailer: Arc<dyn Mailer>, settings: AccountSettings) -> Self {
        Self {
            tokens,
            mailer,
            settings,
        }
    }

    pub fn settings(&self) -> &AccountSettings {
        &self.settings
    }

    // -- Registration and login --

    /// Create an account, mail its confirmation link and notify the admin.
    pub fn register(&self, conn: &rusqlite::Connection, form: &RegistrationForm) -> AppResult<User> {
        let mut errors = form.validate();
        let email = normalize_email(&form.email);
        let username = form.username.trim();

        if errors.get("email").is_empty() && users::find_by_email(conn, &email)?.is_some() {
            errors.add("email", "Email already registered.");
        }
        if errors.get("username").is_empty() && users::find_by_username(conn, username)?.is_some()
        {
            errors.add("username", "Username already in use.");
        }
        errors.into_result().map_err(AppError::Validation)?;

        let password_hash = hash_password(&form.password, self.settings.bcrypt_cost)?;
        let role = self.role_for(conn, &email)?;

        let user = users::insert(
            conn,
            &NewUser {
                email: &email,
                username,
                password_hash: &password_hash,
                role_id: role.id,
                confirmed: false,
            },
        )
        .map_err(conflict)?;
        tracing::info!(user = %user.id, username = %user.username, role = %user.role_name, "Registered user");

        self.send_confirmation(&user)?;

        if let Some(admin) = &self.settings.admin_email {
            self.dispatch(
                admin,
                "New User",
                &NewUserMail {
                    username: &user.username,
                    email: &user.email,
                },
            )?;
        }

        Ok(user)
    }

    /// Check credentials. Never says which half was wrong.
    pub fn authenticate(
        &self,
        conn: &rusqlite::Connection,
        email: &str,
        password: &str,
    ) -> AppResult<User> {
        let user = users::find_by_email(conn, &normalize_email(email))?;
        match user {
            Some(user) if verify_password(password, &user.password_hash) => Ok(user),
            _ => {
                tracing::debug!("Rejected login");
                Err(AppError::field("email", "Invalid email or password."))
            }
        }
    }

    fn role_for(&self, conn: &rusqlite::Connection, email: &str) -> AppResult<Role> {
        let role = match &self.settings.admin_email {
            Some(admin) if admin == email => roles::find_by_name(conn, roles::ADMINISTRATOR_ROLE)?,
            _ => roles::default_role(conn)?,
        };
        role.ok_or_else(|| AppError::Internal("roles have not been seeded".into()))
    }

    // -- Confirmation --

    pub fn generate_confirmation_token(&self, user_id: &str) -> String {
        self.tokens.issue(
            TokenPurpose::Confirm,
            &TokenClaims::user(user_id),
            self.settings.token_ttl_secs,
        )
    }

    /// Mark the account confirmed. A confirmed account stays confirmed
    /// whatever the token.
    pub fn confirm(&self, conn: &rusqlite::Connection, user_id: &str, token: &str) -> AppResult<()> {
        let user = users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)?;
        if user.confirmed {
            return Ok(());
        }

        let claims: TokenClaims = self.tokens.verify(token, TokenPurpose::Confirm)?;
        if claims.user_id != user.id {
            tracing::debug!(user = %user.id, "Confirmation token belongs to another account");
            return Err(AppError::InvalidToken);
        }

        conn.execute(
            "UPDATE users SET confirmed = 1 WHERE id = ?1",
            params![user.id],
        )?;
        tracing::info!(user = %user.id, "Account confirmed");
        Ok(())
    }

    pub fn resend_confirmation(&self, user: &User) -> AppResult<()> {
        self.send_confirmation(user)
    }

    fn send_confirmation(&self, user: &User) -> AppResult<()> {
        let token = self.generate_confirmation_token(&user.id);
        let link = self.link("/auth/confirm", &token);
        self.dispatch(
            &user.email,
            "Confirm Your Account",
            &ConfirmMail {
                username: &user.username,
                link: &link,
            },
        )
    }

    // -- Passwords --

    pub fn change_password(
        &self,
        conn: &rusqlite::Connection,
        user_id: &str,
        old_password: &str,
        password: &str,
        password2: &str,
    ) -> AppResult<()> {
        let user = users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)?;

        let mut errors = FieldErrors::new();
        if !verify_password(old_password, &user.password_hash) {
            errors.add("old_password", "Invalid password.");
        }
        check_new_password(&mut errors, "password", password, password2);
        errors.into_result().map_err(AppError::Validation)?;

        let hash = hash_password(password, self.settings.bcrypt_cost)?;
        users::set_password_hash(conn, &user.id, &hash)?;
        tracing::info!(user = %user.id, "Password changed");
        Ok(())
    }

    pub fn generate_reset_token(&self, user_id: &str) -> String {
        self.tokens.issue(
            TokenPurpose::Reset,
            &TokenClaims::user(user_id),
            self.settings.token_ttl_secs,
        )
    }

    /// Mail a reset link. Unknown addresses get the same silent success.
    pub fn request_password_reset(&self, conn: &rusqlite::Connection, email: &str) -> AppResult<()> {
        let Some(user) = users::find_by_email(conn, &normalize_email(email))? else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(());
        };

        let token = self.generate_reset_token(&user.id);
        let link = self.link("/auth/reset", &token);
        self.dispatch(
            &user.email,
            "Reset Your Password",
            &ResetPasswordMail {
                username: &user.username,
                link: &link,
            },
        )
    }

    /// Overwrite the password of whoever the reset token names.
    pub fn reset_password(
        &self,
        conn: &rusqlite::Connection,
        token: &str,
        password: &str,
        password2: &str,
    ) -> AppResult<()> {
        let mut errors = FieldErrors::new();
        check_new_password(&mut errors, "password", password, password2);
        errors.into_result().map_err(AppError::Validation)?;

        let claims: TokenClaims = self.tokens.verify(token, TokenPurpose::Reset)?;
        let hash = hash_password(password, self.settings.bcrypt_cost)?;
        if !users::set_password_hash(conn, &claims.user_id, &hash)? {
            return Err(AppError::InvalidToken);
        }
        tracing::info!(user = %claims.user_id, "Password reset");
        Ok(())
    }

    // -- Email change --

    pub fn generate_email_change_token(&self, user_id: &str, new_email: &str) -> String {
        self.tokens.issue(
            TokenPurpose::ChangeEmail,
            &TokenClaims {
                user_id: user_id.to_string(),
                new_email: Some(normalize_email(new_email)),
            },
            self.settings.token_ttl_secs,
        )
    }

    /// Check the password and mail a confirmation link to the new address.
    pub fn request_email_change(
        &self,
        conn: &rusqlite::Connection,
        user_id: &str,
        new_email: &str,
        password: &str,
    ) -> AppResult<()> {
        let user = users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)?;
        let new_email = normalize_email(new_email);

        let mut errors = FieldErrors::new();
        check_email(&mut errors, "email", &new_email);
        if errors.get("email").is_empty() && users::find_by_email(conn, &new_email)?.is_some() {
            errors.add("email", "Email already registered.");
        }
        if !verify_password(password, &user.password_hash) {
            errors.add("password", "Invalid password.");
        }
        errors.into_result().map_err(AppError::Validation)?;

        let token = self.generate_email_change_token(&user.id, &new_email);
        let link = self.link("/auth/change-email", &token);
        self.dispatch(
            &new_email,
            "Confirm your email address",
            &ChangeEmailMail {
                username: &user.username,
                link: &link,
            },
        )
    }

    /// Apply a change-email token for `user_id`.
    ///
    /// The address may have been claimed since the link was sent, so it is
    /// checked again here, and the UNIQUE constraint settles any remaining race.
    pub fn change_email(&self, conn: &rusqlite::Connection, user_id: &str, token: &str) -> AppResult<User> {
        let claims: TokenClaims = self.tokens.verify(token, TokenPurpose::ChangeEmail)?;
        if claims.user_id != user_id {
            tracing::debug!(user = %user_id, "Email change token belongs to another account");
            return Err(AppError::InvalidToken);
        }
        let new_email = claims.new_email.ok_or(AppError::InvalidToken)?;

        if let Some(owner) = users::find_by_email(conn, &new_email)? {
            if owner.id == user_id {
                return Ok(owner);
            }
            tracing::info!(user = %user_id, "Email change lost to another account");
            return Err(AppError::field("email", "Email already registered."));
        }

        let updated = conn
            .execute(
                "UPDATE users SET email = ?1, avatar_hash = ?2 WHERE id = ?3",
                params![new_email, profile::avatar_hash(&new_email), user_id],
            )
            .map_err(conflict)?;
        if updated == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!(user = %user_id, "Email address changed");

        users::find_by_id(conn, user_id)?.ok_or(AppError::NotFound)
    }

    // -- API tokens --

    pub fn issue_api_token(&self, user_id: &str) -> String {
        self.tokens.issue(
            TokenPurpose::Auth,
            &TokenClaims::user(user_id),
            self.settings.token_ttl_secs,
        )
    }

    /// The account behind a bearer token, if the token is good and the
    /// account still exists.
    pub fn verify_api_token(&self, conn: &rusqlite::Connection, token: &str) -> AppResult<Option<User>> {
        let Ok(claims) = self.tokens.verify::<TokenClaims>(token, TokenPurpose::Auth) else {
            return Ok(None);
        };
        Ok(users::find_by_id(conn, &claims.user_id)?)
    }

    // -- Mail --

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}{}/{}", self.settings.public_url, path, token)
    }

    fn dispatch<T: MailTemplate>(&self, to: &str, subject: &str, template: &T) -> AppResult<()> {
        let email = Email::render(&self.settings.mail, to, subject, template)
            .map_err(|e| AppError::Internal(format!("mail template failed: {e}")))?;
        tracing::debug!(to = %email.to, subject = %email.subject, "Queued mail");
        send_email(self.mailer.clone(), email);
        Ok(())
    }
}

/// Turn a UNIQUE violation on the users table into the matching field error.
pub(crate) fn conflict(err: rusqlite::Error) -> AppError {
    match db::unique_violation(&err) {
        Some("users.email") => AppError::field("email", "Email already registered."),
        Some("users.username") => AppError::field("username", "Username already in use."),
        _ => AppError::Database(err),
    }
}
