use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::claims::TokenKind;
use super::cookies::SESSION_COOKIE_NAME;
use crate::error::AppError;
use crate::state::AppState;
use crate::users::repo_types::{Role, User};

const NOT_LOGGED_IN: &str = "You are not logged in! Please log in to get access.";

/// The caller resolved by [`protect`], fresh from the store.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized(NOT_LOGGED_IN))
    }
}

/// Bearer header first, then the session cookie.
fn presented_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty() && *v != "logout")
        .map(str::to_string)
}

/// Authenticates the request and attaches [`CurrentUser`]. Every failed step
/// ends the request with 401.
pub async fn protect(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = presented_token(req.headers(), &jar).ok_or_else(|| {
        debug!("no token presented");
        AppError::unauthorized(NOT_LOGGED_IN)
    })?;

    let verified = state
        .tokens
        .verify_kind(&token, TokenKind::Access)
        .map_err(|e| {
            warn!(error = %e, "rejected access token");
            AppError::from(e)
        })?;

    let user = state
        .users
        .find_by_id(verified.subject)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %verified.subject, "token for deleted user");
            AppError::unauthorized("The user belonging to this token no longer exists.")
        })?;

    if user.changed_password_after(verified.issued_at) {
        warn!(user_id = %user.id, "token predates password change");
        return Err(AppError::unauthorized(
            "User recently changed password! Please log in again.",
        ));
    }

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

/// Roles allowed through [`restrict_to`], fixed when the route is built.
#[derive(Debug, Clone)]
pub struct RoleGuard {
    permitted: Arc<[Role]>,
}

impl RoleGuard {
    pub fn new(permitted: &[Role]) -> Self {
        Self {
            permitted: permitted.into(),
        }
    }
}

/// Must sit inside [`protect`]; it never authenticates on its own.
pub async fn restrict_to(
    State(guard): State<RoleGuard>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or_else(|| AppError::unauthorized(NOT_LOGGED_IN))?;

    if !user.0.has_role(&guard.permitted) {
        warn!(user_id = %user.0.id, role = %user.0.role, "role not permitted");
        return Err(AppError::forbidden(
            "You do not have permission to perform this action",
        ));
    }
    Ok(next.run(req).await)
}
