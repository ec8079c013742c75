use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch},
    Router,
};

use crate::auth::middleware::{protect, restrict_to, RoleGuard};
use crate::state::AppState;
use repo_types::Role;

pub mod dto;
pub mod handlers;
pub mod images;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;

/// Every route here requires a logged-in caller.
pub fn router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/admin/users/:id", get(handlers::get_user))
        .route_layer(from_fn_with_state(
            RoleGuard::new(&[Role::Admin]),
            restrict_to,
        ));

    Router::new()
        .route("/me", get(handlers::me))
        .route(
            "/updateImage",
            patch(handlers::update_image).layer(DefaultBodyLimit::max(images::MAX_IMAGE_BYTES)),
        )
        .merge(admin)
        .route_layer(from_fn_with_state(state, protect))
}
