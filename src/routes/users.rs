use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};

use crate::accounts::profile::{self, gravatar_url};
use crate::accounts::users;
use crate::auth::Principal;
use crate::content::posts;
use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};
use crate::follows;
use crate::forms::{EditProfileAdminForm, EditProfileForm, FieldErrors};
use crate::roles::{self, Permission};
use crate::routes::home::Html;
use crate::routes::views::{timestamp, FollowView, Pager, PostView, Viewer};
use crate::routes::PageQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/{username}", get(profile_page))
        .route("/edit-profile", get(edit_profile_page).post(edit_profile))
        .route(
            "/edit-profile/{id}",
            get(admin_edit_profile_page).post(admin_edit_profile),
        )
        .route("/follow/{username}", post(follow))
        .route("/unfollow/{username}", post(unfollow))
        .route("/followers/{username}", get(followers))
        .route("/followed-by/{username}", get(followed_by))
}

// -- Templates --

#[derive(Template)]
#[template(path = "pages/user.html")]
pub struct UserTemplate {
    pub viewer: Viewer,
    pub user: ProfileView,
    pub posts: Vec<PostView>,
    pub pager: Pager,
    pub follower_count: u64,
    pub followed_count: u64,
    pub viewer_follows: bool,
    pub follows_viewer: bool,
    pub is_self: bool,
}

/// Public profile fields. Email is only shown to administrators.
pub struct ProfileView {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: String,
    pub location: String,
    pub about_me: String,
    pub avatar_url: String,
    pub member_since: String,
    pub last_seen: String,
    pub post_count: u64,
}

#[derive(Template)]
#[template(path = "pages/edit_profile.html")]
pub struct EditProfileTemplate {
    pub viewer: Viewer,
    pub form: EditProfileForm,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "pages/edit_profile_admin.html")]
pub struct EditProfileAdminTemplate {
    pub viewer: Viewer,
    pub user_id: String,
    pub form: EditProfileAdminForm,
    pub roles: Vec<Role>,
    pub errors: FieldErrors,
}

#[derive(Template)]
#[template(path = "pages/followers.html")]
pub struct FollowersTemplate {
    pub viewer: Viewer,
    pub title: String,
    pub username: String,
    pub entries: Vec<FollowView>,
    pub pager: Pager,
}

// -- Profile --

/// GET /user/{username}
pub async fn profile_page(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let viewer = Viewer::new(&principal);
    let conn = state.db.get()?;
    let user = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;

    let listing = posts::by_author(
        &conn,
        &user.id,
        query.page(),
        state.config.content.posts_per_page,
    )?;
    let pager = Pager::new(&listing, &format!("/user/{}", user.username));
    let post_count = listing.total;
    let posts = listing
        .items
        .into_iter()
        .map(|post| PostView::new(post, &viewer))
        .collect();

    let (viewer_follows, follows_viewer) = match principal.user() {
        Some(me) if me.id != user.id => (
            follows::is_following(&conn, &me.id, &user.id)?,
            follows::is_followed_by(&conn, &me.id, &user.id)?,
        ),
        _ => (false, false),
    };

    Ok(Html(UserTemplate {
        follower_count: follows::follower_count(&conn, &user.id)?,
        followed_count: follows::followed_count(&conn, &user.id)?,
        is_self: viewer.is(&user.id),
        user: profile_view(user, viewer.is_admin, post_count),
        viewer,
        posts,
        pager,
        viewer_follows,
        follows_viewer,
    })
    .into_response())
}

fn profile_view(user: User, show_email: bool, post_count: u64) -> ProfileView {
    ProfileView {
        avatar_url: gravatar_url(&user.avatar_hash, 256),
        member_since: timestamp(&user.member_since),
        last_seen: timestamp(&user.last_seen),
        email: show_email.then_some(user.email),
        id: user.id,
        username: user.username,
        name: user.name.unwrap_or_default(),
        location: user.location.unwrap_or_default(),
        about_me: user.about_me.unwrap_or_default(),
        post_count,
    }
}

// -- Profile editing --

/// GET /edit-profile
pub async fn edit_profile_page(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Response> {
    let me = principal.signed_in()?;
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &me.id)?.ok_or(AppError::NotFound)?;

    Ok(Html(EditProfileTemplate {
        viewer: Viewer::new(&principal),
        form: EditProfileForm {
            name: user.name.unwrap_or_default(),
            location: user.location.unwrap_or_default(),
            about_me: user.about_me.unwrap_or_default(),
        },
        errors: FieldErrors::new(),
    })
    .into_response())
}

/// POST /edit-profile
pub async fn edit_profile(
    State(state): State<AppState>,
    principal: Principal,
    Form(form): Form<EditProfileForm>,
) -> AppResult<Response> {
    let me = principal.signed_in()?;
    let conn = state.db.get()?;

    match profile::edit_profile(&conn, &me.id, &form) {
        Ok(user) => Ok(Redirect::to(&format!("/user/{}", user.username)).into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(EditProfileTemplate {
            viewer: Viewer::new(&principal),
            form,
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

/// GET /edit-profile/{id}
pub async fn admin_edit_profile_page(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> AppResult<Response> {
    principal.require(Permission::ADMINISTER)?;
    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &id)?.ok_or(AppError::NotFound)?;

    Ok(Html(EditProfileAdminTemplate {
        viewer: Viewer::new(&principal),
        user_id: user.id,
        form: EditProfileAdminForm {
            email: user.email,
            username: user.username,
            confirmed: user.confirmed.then(|| "on".to_string()),
            role: user.role_id,
            name: user.name.unwrap_or_default(),
            location: user.location.unwrap_or_default(),
            about_me: user.about_me.unwrap_or_default(),
        },
        roles: roles::list(&conn)?,
        errors: FieldErrors::new(),
    })
    .into_response())
}

/// POST /edit-profile/{id}
pub async fn admin_edit_profile(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Form(form): Form<EditProfileAdminForm>,
) -> AppResult<Response> {
    principal.require(Permission::ADMINISTER)?;
    let conn = state.db.get()?;

    match profile::admin_edit_profile(&conn, &id, &form) {
        Ok(user) => Ok(Redirect::to(&format!("/user/{}", user.username)).into_response()),
        Err(AppError::Validation(errors)) => Ok(Html(EditProfileAdminTemplate {
            viewer: Viewer::new(&principal),
            user_id: id,
            form,
            roles: roles::list(&conn)?,
            errors,
        })
        .into_response()),
        Err(e) => Err(e),
    }
}

// -- Follow graph --

/// POST /follow/{username}
pub async fn follow(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let me = principal.require(Permission::FOLLOW)?;
    let conn = state.db.get()?;
    let user = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;

    follows::follow(&conn, &me.id, &user.id)?;
    Ok(Redirect::to(&format!("/user/{}", user.username)).into_response())
}

/// POST /unfollow/{username}
pub async fn unfollow(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let me = principal.require(Permission::FOLLOW)?;
    let conn = state.db.get()?;
    let user = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;

    follows::unfollow(&conn, &me.id, &user.id)?;
    Ok(Redirect::to(&format!("/user/{}", user.username)).into_response())
}

/// GET /followers/{username}
pub async fn followers(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;
    let listing = follows::followers(
        &conn,
        &user.id,
        query.page(),
        state.config.content.followers_per_page,
    )?;

    Ok(Html(FollowersTemplate {
        viewer: Viewer::new(&principal),
        title: format!("Followers of {}", user.username),
        pager: Pager::new(&listing, &format!("/followers/{}", user.username)),
        username: user.username,
        entries: listing.items.into_iter().map(FollowView::from).collect(),
    })
    .into_response())
}

/// GET /followed-by/{username}
pub async fn followed_by(
    State(state): State<AppState>,
    principal: Principal,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let user = users::find_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;
    let listing = follows::followed(
        &conn,
        &user.id,
        query.page(),
        state.config.content.followers_per_page,
    )?;

    Ok(Html(FollowersTemplate {
        viewer: Viewer::new(&principal),
        title: format!("Followed by {}", user.username),
        pager: Pager::new(&listing, &format!("/followed-by/{}", user.username)),
        username: user.username,
        entries: listing.items.into_iter().map(FollowView::from).collect(),
    })
    .into_response())
}
