use axum::{
    extract::{Host, Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use time::OffsetDateTime;
use tracing::instrument;

use super::cookies::REFRESH_COOKIE_NAME;
use super::dto::{
    AccessTokenData, Envelope, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest,
    SignupRequest, StatusMessage, UpdatePasswordRequest,
};
use super::middleware::CurrentUser;
use super::services;
use super::session::{self, SessionResponse};
use crate::error::AppResult;
use crate::state::AppState;

#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<SignupRequest>,
) -> AppResult<SessionResponse> {
    let user = services::signup(&state, body).await?;
    session::start(&state, jar, &user, StatusCode::CREATED)
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<SessionResponse> {
    let user = services::login(&state, body).await?;
    session::start(&state, jar, &user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusMessage>) {
    (session::end(&state, jar), Json(StatusMessage::success()))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<Envelope<AccessTokenData>>)> {
    let presented = jar.get(REFRESH_COOKIE_NAME).map(|c| c.value().to_string());
    let access_token = services::refresh(&state, presented.as_deref()).await?;
    let jar = session::mirror_access(&state, jar, access_token.clone(), OffsetDateTime::now_utc());
    Ok((jar, Json(Envelope::success(AccessTokenData { access_token }))))
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Host(host): Host,
    Json(body): Json<ForgotPasswordRequest>,
) -> AppResult<Json<StatusMessage>> {
    let origin = format!("{}://{}", state.config.public_scheme(), host);
    services::forgot_password(&state, body, &origin).await?;
    Ok(Json(StatusMessage::with_message("Token sent to email!")))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    jar: CookieJar,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<SessionResponse> {
    let user = services::reset_password(&state, &token, body).await?;
    session::start(&state, jar, &user, StatusCode::OK)
}

#[instrument(skip_all)]
pub async fn update_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    jar: CookieJar,
    Json(body): Json<UpdatePasswordRequest>,
) -> AppResult<SessionResponse> {
    let user = services::update_password(&state, user, body).await?;
    session::start(&state, jar, &user, StatusCode::OK)
}
