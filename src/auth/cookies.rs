use axum_extra::extract::cookie::{Cookie, SameSite};
use time::{Duration, OffsetDateTime};

use crate::config::CookieConfig;

/// Long-lived refresh token. Only ever set as a cookie, never in a body.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Optional session cookie holding an access token; `protect` falls back to
/// it when no bearer header is sent.
pub const SESSION_COOKIE_NAME: &str = "jwt";

const LOGGED_OUT: &str = "logout";

fn base(name: &'static str, value: String, cfg: &CookieConfig) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

pub fn refresh_cookie(token: String, cfg: &CookieConfig, now: OffsetDateTime) -> Cookie<'static> {
    let mut cookie = base(REFRESH_COOKIE_NAME, token, cfg);
    cookie.set_expires(now + Duration::days(cfg.ttl_days));
    cookie
}

/// Access token mirrored into a cookie; expires with the token itself.
pub fn session_cookie(token: String, cfg: &CookieConfig, expires: OffsetDateTime) -> Cookie<'static> {
    let mut cookie = base(SESSION_COOKIE_NAME, token, cfg);
    cookie.set_expires(expires);
    cookie
}

/// Overwrites `name` with a placeholder that is already expired.
pub fn expired_cookie(name: &'static str, cfg: &CookieConfig, now: OffsetDateTime) -> Cookie<'static> {
    let mut cookie = base(name, LOGGED_OUT.to_string(), cfg);
    cookie.set_expires(now - Duration::seconds(1));
    cookie
}
