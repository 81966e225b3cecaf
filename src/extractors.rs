use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::accounts::users;
use crate::auth::session;
use crate::auth::{CurrentUser, Principal};
use crate::error::AppError;
use crate::state::AppState;

/// Resolves who is calling: a bearer API token first, then the session
/// cookie, otherwise anonymous. Authenticated callers get `last_seen` bumped.
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }

        let conn = state.db.get()?;
        let user = if let Some(token) = bearer_token(&parts.headers) {
            state.accounts.verify_api_token(&conn, token)?
        } else if let Some(token) = cookie_value(&parts.headers, &state.config.auth.cookie_name) {
            session::session_user(&conn, token)?
        } else {
            None
        };

        let principal = match user {
            Some(user) => {
                users::ping(&conn, &user.id)?;
                Principal::Authenticated(CurrentUser::from(user))
            }
            None => Principal::Anonymous,
        };
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }
}

/// Requires a signed-in caller. 401 otherwise.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Principal::from_request_parts(parts, state).await? {
            Principal::Authenticated(user) => Ok(user),
            Principal::Anonymous => Err(AppError::Unauthorized),
        }
    }
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_value_finds_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("show_followed=1; scribe_session=abc"),
        );
        assert_eq!(cookie_value(&headers, "scribe_session"), Some("abc"));
        assert_eq!(cookie_value(&headers, "show_followed"), Some("1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));
        assert_eq!(bearer_token(&headers), Some("t0k"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
