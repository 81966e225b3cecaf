//! Form payloads and their field-level validation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const MAX_FIELD_LEN: usize = 64;
pub const MAX_BODY_LEN: usize = 10_000;

/// Field name -> messages, surfaced next to the offending input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First message for a field, or an empty string. Handy in templates.
    pub fn first(&self, field: &str) -> &str {
        self.get(field).first().map(String::as_str).unwrap_or("")
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

pub fn check_required(errors: &mut FieldErrors, field: &'static str, value: &str) -> bool {
    if value.trim().is_empty() {
        errors.add(field, "This field is required.");
        return false;
    }
    true
}

pub fn check_length(errors: &mut FieldErrors, field: &'static str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.add(
            field,
            format!("Field must be at most {} characters long.", max),
        );
    }
}

/// Loose structural check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

/// Letters, digits, dots or underscores, starting with a letter.
pub fn is_valid_username(username: &str) -> bool {
    let mut chars = username.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

pub fn check_email(errors: &mut FieldErrors, field: &'static str, email: &str) {
    if !check_required(errors, field, email) {
        return;
    }
    check_length(errors, field, email, MAX_FIELD_LEN);
    if !is_valid_email(email) {
        errors.add(field, "Invalid email address.");
    }
}

pub fn check_username(errors: &mut FieldErrors, field: &'static str, username: &str) {
    if !check_required(errors, field, username) {
        return;
    }
    check_length(errors, field, username, MAX_FIELD_LEN);
    if !is_valid_username(username) {
        errors.add(
            field,
            "Usernames must have only letters, numbers, dots or underscores",
        );
    }
}

pub fn check_new_password(
    errors: &mut FieldErrors,
    field: &'static str,
    password: &str,
    confirmation: &str,
) {
    if password.is_empty() {
        errors.add(field, "This field is required.");
    } else if password != confirmation {
        errors.add(field, "Passwords must match.");
    }
}

/// Normalize the email the way it is stored.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: Option<String>,
    /// Where to go after signing in. Only local paths are honored.
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password2: String,
}

impl RegistrationForm {
    /// Shape checks only; uniqueness is checked against the store.
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, "email", self.email.trim());
        check_username(&mut errors, "username", self.username.trim());
        check_new_password(&mut errors, "password", &self.password, &self.password2);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangePasswordForm {
    pub old_password: String,
    pub password: String,
    pub password2: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordResetRequestForm {
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordResetForm {
    pub password: String,
    pub password2: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeEmailForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EditProfileForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
}

impl EditProfileForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_length(&mut errors, "name", &self.name, MAX_FIELD_LEN);
        check_length(&mut errors, "location", &self.location, MAX_FIELD_LEN);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditProfileAdminForm {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub confirmed: Option<String>,
    pub role: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
}

impl EditProfileAdminForm {
    pub fn is_confirmed(&self) -> bool {
        checkbox(&self.confirmed)
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, "email", self.email.trim());
        check_username(&mut errors, "username", self.username.trim());
        check_length(&mut errors, "name", &self.name, MAX_FIELD_LEN);
        check_length(&mut errors, "location", &self.location, MAX_FIELD_LEN);
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostForm {
    pub body: String,
}

impl PostForm {
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        if check_required(&mut errors, "body", &self.body) {
            check_length(&mut errors, "body", &self.body, MAX_BODY_LEN);
        }
        errors
    }
}

/// HTML checkboxes post `on` when ticked and nothing otherwise.
pub fn checkbox(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("on" | "true" | "1" | "yes"))
}
