//! JSON API under /api/v1, exercised with bearer tokens.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use scribe::accounts::users::{self, NewUser};
use scribe::accounts::{AccountSettings, Accounts};
use scribe::auth::password::hash_password;
use scribe::auth::session;
use scribe::auth::tokens::TokenCodec;
use scribe::config::Config;
use scribe::mail::MemoryMailer;
use scribe::state::AppState;
use scribe::{db, follows, roles, routes};

fn setup() -> (TempDir, AppState, Router) {
    let dir = TempDir::new().unwrap();
    let pool = db::create_pool(&dir.path().join("api.db")).unwrap();
    db::run_migrations(&pool).unwrap();
    roles::insert_roles(&pool.get().unwrap()).unwrap();

    let config = Config::default();
    let accounts = Accounts::new(
        TokenCodec::new(b"api secret".to_vec()),
        Arc::new(MemoryMailer::new()),
        AccountSettings::from_config(&config),
    );
    let state = AppState {
        db: pool,
        config,
        accounts: Arc::new(accounts),
    };
    let app = routes::router(state.clone());
    (dir, state, app)
}

fn create_user(state: &AppState, username: &str, confirmed: bool) -> String {
    let conn = state.db.get().unwrap();
    let role = roles::default_role(&conn).unwrap().unwrap();
    let hash = hash_password("cat", 4).unwrap();
    users::insert(
        &conn,
        &NewUser {
            email: &format!("{username}@example.com"),
            username,
            password_hash: &hash,
            role_id: role.id,
            confirmed,
        },
    )
    .unwrap()
    .id
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn token_for(app: &Router, email: &str) -> String {
    let response = call(
        app,
        "POST",
        "/api/v1/tokens",
        None,
        Some(json!({"email": email, "password": "cat"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["expiration"], 3600);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn anonymous_callers_are_unauthorized() {
    let (_dir, _state, app) = setup();

    let response = call(&app, "GET", "/api/v1/posts", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["error"], "unauthorized");

    let response = call(&app, "GET", "/api/v1/posts", Some("garbage"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn browser_session_is_not_an_api_credential() {
    let (_dir, state, app) = setup();
    let user_id = create_user(&state, "john", true);
    let session = session::create_session(&state.db.get().unwrap(), &user_id, 1).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/posts")
        .header(header::COOKIE, format!("scribe_session={session}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"body": "via cookie"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "unauthorized");

    let conn = state.db.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn bad_credentials_get_no_token() {
    let (_dir, state, app) = setup();
    create_user(&state, "john", true);

    let response = call(
        &app,
        "POST",
        "/api/v1/tokens",
        None,
        Some(json!({"email": "john@example.com", "password": "dog"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unconfirmed_accounts_are_forbidden() {
    let (_dir, state, app) = setup();
    create_user(&state, "john", false);

    let response = call(
        &app,
        "POST",
        "/api/v1/tokens",
        None,
        Some(json!({"email": "john@example.com", "password": "cat"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A token issued out of band is still refused while unconfirmed
    let user_id = {
        let conn = state.db.get().unwrap();
        users::find_by_email(&conn, "john@example.com")
            .unwrap()
            .unwrap()
            .id
    };
    let token = state.accounts.issue_api_token(&user_id);
    let response = call(&app, "GET", "/api/v1/posts", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["message"], "Unconfirmed account");
}

#[tokio::test]
async fn posts_and_comments_round_trip() {
    let (_dir, state, app) = setup();
    create_user(&state, "john", true);
    create_user(&state, "susan", true);
    let john = token_for(&app, "john@example.com").await;
    let susan = token_for(&app, "susan@example.com").await;

    let response = call(
        &app,
        "POST",
        "/api/v1/posts",
        Some(&john),
        Some(json!({"body": "*hello* <script>x</script>"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let post = json_body(response).await;
    assert_eq!(post["url"], location.as_str());
    assert_eq!(post["author"], "john");
    assert!(post["body_html"].as_str().unwrap().contains("<em>hello</em>"));
    assert!(!post["body_html"].as_str().unwrap().contains("script"));

    // Only the author may edit
    let response = call(
        &app,
        "PUT",
        &location,
        Some(&susan),
        Some(json!({"body": "mine now"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = call(
        &app,
        "PUT",
        &location,
        Some(&john),
        Some(json!({"body": "edited"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["body"], "edited");

    let comments_url = post["comments_url"].as_str().unwrap().to_string();
    let response = call(
        &app,
        "POST",
        &comments_url,
        Some(&susan),
        Some(json!({"body": "nice"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = call(&app, "GET", &comments_url, Some(&john), None).await;
    let listing = json_body(response).await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["items"][0]["author"], "susan");

    let response = call(
        &app,
        "POST",
        &comments_url,
        Some(&susan),
        Some(json!({"body": "   "})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn timeline_follows_the_graph() {
    let (_dir, state, app) = setup();
    let john_id = create_user(&state, "john", true);
    let susan_id = create_user(&state, "susan", true);
    let john = token_for(&app, "john@example.com").await;
    let susan = token_for(&app, "susan@example.com").await;

    call(&app, "POST", "/api/v1/posts", Some(&susan), Some(json!({"body": "from susan"}))).await;
    call(&app, "POST", "/api/v1/posts", Some(&john), Some(json!({"body": "from john"}))).await;

    let timeline = format!("/api/v1/users/{john_id}/timeline");
    let listing = json_body(call(&app, "GET", &timeline, Some(&john), None).await).await;
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["items"][0]["author"], "john");

    follows::follow(&state.db.get().unwrap(), &john_id, &susan_id).unwrap();
    let listing = json_body(call(&app, "GET", &timeline, Some(&john), None).await).await;
    assert_eq!(listing["count"], 2);

    let user = json_body(
        call(&app, "GET", &format!("/api/v1/users/{susan_id}"), Some(&john), None).await,
    )
    .await;
    assert_eq!(user["username"], "susan");
    assert_eq!(user["post_count"], 1);

    let response = call(&app, "GET", "/api/v1/users/missing", Some(&john), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
