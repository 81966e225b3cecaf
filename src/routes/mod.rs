pub mod api;
pub mod auth;
pub mod home;
pub mod moderate;
pub mod posts;
pub mod users;
pub mod views;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::Principal;
use crate::error::AppError;
use crate::state::AppState;

/// `?page=N`, 1-based.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }
}

/// The whole application: pages, account routes and the JSON API.
pub fn router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(home::index).post(home::create_post))
        .route("/all", get(home::show_all))
        .route("/followed", get(home::show_followed))
        .merge(users::router())
        .merge(posts::router())
        .merge(moderate::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            redirect_unconfirmed,
        ));

    Router::new()
        .merge(pages)
        .merge(auth::router())
        .nest("/api/v1", api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Signed-in but unconfirmed accounts only get the account pages.
async fn redirect_unconfirmed(principal: Principal, request: Request, next: Next) -> Response {
    if principal.user().is_some_and(|user| !user.confirmed) {
        return AppError::Unconfirmed.into_response();
    }
    next.run(request).await
}
