use axum::{
    middleware::from_fn_with_state,
    routing::{patch, post},
    Router,
};

use crate::state::AppState;

pub mod claims;
pub mod cookies;
pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod reset;
pub mod services;
pub mod session;

/// Public prefix of every account route; also used to build reset links.
pub const BASE_PATH: &str = "/api/v1/freshcart/user";

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/updatePassword", patch(handlers::update_password))
        .route_layer(from_fn_with_state(state, middleware::protect));

    Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/refresh", post(handlers::refresh))
        .route("/forgotPassword", post(handlers::forgot_password))
        .route("/resetPassword/:token", patch(handlers::reset_password))
        .merge(protected)
}
