use axum::{http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use time::{Duration, OffsetDateTime};
use tracing::info;

use super::claims::TokenKind;
use super::cookies::{
    expired_cookie, refresh_cookie, session_cookie, REFRESH_COOKIE_NAME, SESSION_COOKIE_NAME,
};
use super::dto::{Envelope, SessionData};
use crate::error::AppResult;
use crate::state::AppState;
use crate::users::repo_types::{PublicUser, User};

pub type SessionResponse = (StatusCode, CookieJar, Json<Envelope<SessionData>>);

/// Mints an access/refresh pair for `user`. The refresh token goes into its
/// cookie only; the access token is returned in the body and mirrored into
/// the session cookie.
pub fn start(
    state: &AppState,
    jar: CookieJar,
    user: &User,
    status: StatusCode,
) -> AppResult<SessionResponse> {
    let now = OffsetDateTime::now_utc();
    let access_token = state.tokens.issue_at(user.id, TokenKind::Access, now)?;
    let refresh_token = state.tokens.issue_at(user.id, TokenKind::Refresh, now)?;

    let jar = jar.add(refresh_cookie(refresh_token, &state.config.cookie, now));
    let jar = mirror_access(state, jar, access_token.clone(), now);

    info!(user_id = %user.id, "session issued");
    Ok((
        status,
        jar,
        Json(Envelope::success(SessionData {
            user: PublicUser::from(user),
            access_token,
        })),
    ))
}

/// Puts `access_token` into the session cookie, expiring with the token.
pub fn mirror_access(
    state: &AppState,
    jar: CookieJar,
    access_token: String,
    issued_at: OffsetDateTime,
) -> CookieJar {
    let lifetime = state.tokens.lifetime(TokenKind::Access).as_secs() as i64;
    let expires = issued_at + Duration::seconds(lifetime);
    jar.add(session_cookie(access_token, &state.config.cookie, expires))
}

/// Overwrites both auth cookies with expired placeholders.
pub fn end(state: &AppState, jar: CookieJar) -> CookieJar {
    let now = OffsetDateTime::now_utc();
    let cfg = &state.config.cookie;
    jar.add(expired_cookie(REFRESH_COOKIE_NAME, cfg, now))
        .add(expired_cookie(SESSION_COOKIE_NAME, cfg, now))
}
