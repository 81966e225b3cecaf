use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::accounts::users;
use crate::auth::{session, Principal};
use crate::error::{AppError, AppResult};
use crate::extractors::cookie_value;
use crate::forms::{
    check_email, checkbox, ChangeEmailForm, ChangePasswordForm, FieldErrors, LoginForm,
    PasswordResetForm, PasswordResetRequestForm, RegistrationForm,
};
use crate::routes::home::Html;
use crate::routes::views::{message, message_with_link, Viewer};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(login_page).post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/register", get(register_page).post(register))
        .route("/auth/confirm", get(resend_confirmation))
        .route("/auth/confirm/{token}", get(confirm))
        .route("/auth/unconfirmed", get(unconfirmed))
        .route(
            "/auth/change-password",
            get(change_password_page).post(change_password),
        )
        .route("/auth/reset", get(reset_request_page).post(reset_request))
        .route("/auth/reset/{token}", get(reset_page).post(reset))
        .route(
            "/auth/change-email",
            get(change_email_page).post(change_email_request),
        )
        .route("/auth/change-email/{token}", get(change_email))
}

// -- Templates --

#[derive(Template)]
#[template(path = "auth/login.html")]
pub struct LoginTemplate {
    pub viewer: Viewer,
    pub email: String,
    pub next: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "auth/register.html")]
pub struct RegisterTemplate {
    pub viewer: Viewer,
    pub email: String,
    pub username: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "auth/unconfirmed.html")]
pub struct UnconfirmedTemplate {
    pub viewer: Viewer,
    pub username: String,
}

#[derive(Template)]
#[template(path = "auth/change_password.html")]
pub struct ChangePasswordTemplate {
    pub viewer: Viewer,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "auth/reset_request.html")]
pub struct ResetRequestTemplate {
    pub viewer: Viewer,
    pub email: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "auth/reset.html")]
pub struct ResetTemplate {
    pub viewer: Viewer,
    pub token: String,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "auth/change_email.html")]
pub struct ChangeEmailTemplate {
    pub viewer: Viewer,
    pub email: String,
    pub errors: FieldErrors,
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

// -- Cookie helpers --

// Lax so that links followed from mail arrive with the session.
fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

/// Local paths only, so `next` cannot bounce the user off-site.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        // Browsers read `/\host` like `//host`
        Some(path)
            if path.starts_with('/')
                && !matches!(path.as_bytes().get(1), Some(b'/' | b'\\')) =>
        {
            path
        }
        _ => "/",
    }
}

/// Token links are plain paths, so `next` needs no escaping.
fn login_redirect(next: &str) -> Response {
    Redirect::to(&format!("/auth/login?next={next}")).into_response()
}

// -- Login / logout --

/// GET /auth/login
pub async fn login_page(principal: Principal, Query(query): Query<NextQuery>) -> Response {
    Html(LoginTemplate {
        viewer: Viewer::new(&principal),
        email: String::new(),
        next: safe_next(query.next.as_deref()).to_string(),
        errors: FieldErrors::new(),
    })
    .into_response()
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    let user = match state.accounts.authenticate(&conn, &form.email, &form.password) {
        Ok(user) => user,
        Err(AppError::Validation(errors)) => {
            return Ok(Html(LoginTemplate {
                viewer: Viewer::new(&principal),
                email: form.email,
                next: safe_next(form.next.as_deref()).to_string(),
                errors,
            })
            .into_response());
        }
        Err(e) => return Err(e),
    };

    let auth = &state.config.auth;
    let hours = if checkbox(&form.remember_me) {
        auth.session_hours
    } else {
        auth.short_session_hours
    };
    let token = session::create_session(&conn, &user.id, hours)?;
    tracing::info!(user = %user.username, "Logged in");

    Ok((
        AppendHeaders([(
            header::SET_COOKIE,
            session_cookie(&auth.cookie_name, &token, hours),
        )]),
        Redirect::to(safe_next(form.next.as_deref())),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = cookie_value(&headers, cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }

    Ok((
        AppendHeaders([(header::SET_COOKIE, clear_session_cookie(cookie_name))]),
        message(
            Viewer::default(),
            "Logged out",
            "You have been logged out.",
        ),
    )
        .into_response())
}

// -- Registration and confirmation --

/// GET /auth/register
pub async fn register_page(principal: Principal) -> Response {
    Html(RegisterTemplate {
        viewer: Viewer::new(&principal),
        email: String::new(),
        username: String::new(),
        errors: FieldErrors::new(),
    })
    .into_response()
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<RegistrationForm>,
) -> AppResult<Response> {
    let conn = state.db.get()?;

    match state.accounts.register(&conn, &form) {
        Ok(_) => Ok(message_with_link(
            Viewer::new(&principal),
            "Registered",
            "A confirmation email has been sent to you by email.",
            "/auth/login",
            "Log in",
        )
        .into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(RegisterTemplate {
            viewer: Viewer::new(&principal),
            email: form.email,
            username: form.username,
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /auth/confirm/{token}
pub async fn confirm(
    State(state): State<AppState>,
    principal: Principal,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let Some(user) = principal.user() else {
        return Ok(login_redirect(&format!("/auth/confirm/{token}")));
    };
    let conn = state.db.get()?;

    match state.accounts.confirm(&conn, &user.id, &token) {
        Ok(()) => Ok(message_with_link(
            Viewer::new(&principal),
            "Account confirmed",
            "You have confirmed your account. Thanks!",
            "/",
            "Continue",
        )
        .into_response()),
        Err(AppError::InvalidToken) => Ok((
            StatusCode::BAD_REQUEST,
            message_with_link(
                Viewer::new(&principal),
                "Invalid link",
                "The confirmation link is invalid or has expired.",
                "/auth/confirm",
                "Send a new one",
            ),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /auth/confirm: Mail a fresh confirmation link.
pub async fn resend_confirmation(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Response> {
    let me = principal.signed_in()?;
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &me.id)?.ok_or(AppError::NotFound)?;

    state.accounts.resend_confirmation(&user)?;
    Ok(message(
        Viewer::new(&principal),
        "Confirmation sent",
        "A new confirmation email has been sent to you by email.",
    )
    .into_response())
}

/// GET /auth/unconfirmed
pub async fn unconfirmed(principal: Principal) -> Response {
    match principal.user() {
        Some(user) if !user.confirmed => Html(UnconfirmedTemplate {
            username: user.username.clone(),
            viewer: Viewer::new(&principal),
        })
        .into_response(),
        _ => Redirect::to("/").into_response(),
    }
}

// -- Passwords --

/// GET /auth/change-password
pub async fn change_password_page(principal: Principal) -> AppResult<Response> {
    principal.signed_in()?;
    Ok(Html(ChangePasswordTemplate {
        viewer: Viewer::new(&principal),
        errors: FieldErrors::new(),
    })
    .into_response())
}

/// POST /auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    let me = principal.signed_in()?;
    let conn = state.db.get()?;

    match state.accounts.change_password(
        &conn,
        &me.id,
        &form.old_password,
        &form.password,
        &form.password2,
    ) {
        Ok(()) => Ok(message(
            Viewer::new(&principal),
            "Password changed",
            "Your password has been updated.",
        )
        .into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(ChangePasswordTemplate {
            viewer: Viewer::new(&principal),
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /auth/reset
pub async fn reset_request_page(principal: Principal) -> Response {
    if principal.is_authenticated() {
        return Redirect::to("/").into_response();
    }
    Html(ResetRequestTemplate {
        viewer: Viewer::default(),
        email: String::new(),
        errors: FieldErrors::new(),
    })
    .into_response()
}

/// POST /auth/reset: Always answers the same way, known address or not.
pub async fn reset_request(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<PasswordResetRequestForm>,
) -> AppResult<Response> {
    if principal.is_authenticated() {
        return Ok(Redirect::to("/").into_response());
    }

    let mut errors = FieldErrors::new();
    check_email(&mut errors, "email", form.email.trim());
    if !errors.is_empty() {
        return Ok(Html(ResetRequestTemplate {
            viewer: Viewer::default(),
            email: form.email,
            errors,
        })
        .into_response());
    }

    let conn = state.db.get()?;
    state.accounts.request_password_reset(&conn, &form.email)?;
    Ok(message_with_link(
        Viewer::default(),
        "Check your email",
        "An email with instructions to reset your password has been sent to you.",
        "/auth/login",
        "Log in",
    )
    .into_response())
}

/// GET /auth/reset/{token}
pub async fn reset_page(principal: Principal, Path(token): Path<String>) -> Response {
    if principal.is_authenticated() {
        return Redirect::to("/").into_response();
    }
    Html(ResetTemplate {
        viewer: Viewer::default(),
        token,
        errors: FieldErrors::new(),
    })
    .into_response()
}

/// POST /auth/reset/{token}
pub async fn reset(
    State(state): State<AppState>,
    principal: Principal,
    Path(token): Path<String>,
    Form(form): Form<PasswordResetForm>,
) -> AppResult<Response> {
    if principal.is_authenticated() {
        return Ok(Redirect::to("/").into_response());
    }
    let conn = state.db.get()?;

    match state
        .accounts
        .reset_password(&conn, &token, &form.password, &form.password2)
    {
        Ok(()) => Ok(message_with_link(
            Viewer::default(),
            "Password reset",
            "Your password has been updated.",
            "/auth/login",
            "Log in",
        )
        .into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(ResetTemplate {
            viewer: Viewer::default(),
            token,
            errors,
        })
        .into_response()),
        Err(AppError::InvalidToken) => Ok((
            StatusCode::BAD_REQUEST,
            message_with_link(
                Viewer::default(),
                "Invalid link",
                "The reset link is invalid or has expired.",
                "/auth/reset",
                "Request a new one",
            ),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

// -- Email change --

/// GET /auth/change-email
pub async fn change_email_page(principal: Principal) -> AppResult<Response> {
    principal.signed_in()?;
    Ok(Html(ChangeEmailTemplate {
        viewer: Viewer::new(&principal),
        email: String::new(),
        errors: FieldErrors::new(),
    })
    .into_response())
}

/// POST /auth/change-email
pub async fn change_email_request(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<ChangeEmailForm>,
) -> AppResult<Response> {
    let me = principal.signed_in()?;
    let conn = state.db.get()?;

    match state
        .accounts
        .request_email_change(&conn, &me.id, &form.email, &form.password)
    {
        Ok(()) => Ok(message(
            Viewer::new(&principal),
            "Check your email",
            "An email with instructions to confirm your new email address has been sent to you.",
        )
        .into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(ChangeEmailTemplate {
            viewer: Viewer::new(&principal),
            email: form.email,
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /auth/change-email/{token}
pub async fn change_email(
    State(state): State<AppState>,
    principal: Principal,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let Some(me) = principal.user() else {
        return Ok(login_redirect(&format!("/auth/change-email/{token}")));
    };
    let conn = state.db.get()?;

    let failure = match state.accounts.change_email(&conn, &me.id, &token) {
        Ok(_) => {
            return Ok(message(
                Viewer::new(&principal),
                "Email updated",
                "Your email address has been updated.",
            )
            .into_response())
        }
        Err(AppError::InvalidToken) => "The link is invalid or has expired.",
        Err(AppError::Validation(_)) => "That address now belongs to another account.",
        Err(e) => return Err(e),
    };

    Ok((
        StatusCode::BAD_REQUEST,
        message(Viewer::new(&principal), "Invalid request", failure),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_must_be_a_local_path() {
        assert_eq!(safe_next(Some("/post/1")), "/post/1");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("/\\evil.example")), "/");
        assert_eq!(safe_next(Some("/")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn session_cookie_carries_max_age() {
        let cookie = session_cookie("scribe_session", "abc", 2);
        assert!(cookie.starts_with("scribe_session=abc;"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.contains("HttpOnly"));
    }
}
