use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};

use super::claims::TokenKind;
use super::dto::{
    normalize_email, ForgotPasswordRequest, LoginRequest, NewPassword, ResetPasswordRequest,
    SignupRequest, UpdatePasswordRequest,
};
use super::password::{hash_password_blocking, verify_dummy, verify_password_blocking};
use super::reset::{hash_reset_token, ResetToken};
use super::BASE_PATH;
use crate::error::{AppError, AppResult};
use crate::mail::Email;
use crate::state::AppState;
use crate::users::repo_types::{password_stamp, NewUser, User};

const BAD_CREDENTIALS: &str = "Incorrect email or password";
const SESSION_EXPIRED: &str = "Your session has expired. Please log in again.";

#[instrument(skip(state, req), fields(email = %req.email))]
pub async fn signup(state: &AppState, req: SignupRequest) -> AppResult<User> {
    let valid = req.validate()?;
    let hash = hash_password_blocking(valid.password.into_inner()).await?;
    let now = OffsetDateTime::now_utc();

    let user = state
        .users
        .create(NewUser {
            name: valid.name,
            email: valid.email,
            password_hash: hash,
            password_changed_at: password_stamp(now),
        })
        .await?;

    info!(user_id = %user.id, "user registered");
    Ok(user)
}

#[instrument(skip(state, req))]
pub async fn login(state: &AppState, req: LoginRequest) -> AppResult<User> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("Please provide an email and password!"));
    }

    let Some(user) = state.users.find_by_email(&email).await? else {
        verify_dummy(req.password).await;
        warn!("login for unknown email");
        return Err(AppError::unauthorized(BAD_CREDENTIALS));
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login with wrong password");
        return Err(AppError::unauthorized(BAD_CREDENTIALS));
    }

    info!(user_id = %user.id, "user logged in");
    Ok(user)
}

/// Mints a new access token from a refresh token. Any failure, including a
/// user that vanished or changed password since, is the same 401.
#[instrument(skip_all)]
pub async fn refresh(state: &AppState, refresh_token: Option<&str>) -> AppResult<String> {
    let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
        return Err(AppError::unauthorized(
            "You are not logged in! Please log in to get access.",
        ));
    };

    let verified = state
        .tokens
        .verify_kind(token, TokenKind::Refresh)
        .map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            AppError::unauthorized(SESSION_EXPIRED)
        })?;

    let user = state.users.find_by_id(verified.subject).await?;
    match user {
        Some(u) if !u.changed_password_after(verified.issued_at) => {
            let access = state.tokens.sign_access(u.id)?;
            info!(user_id = %u.id, "access token refreshed");
            Ok(access)
        }
        _ => {
            warn!(user_id = %verified.subject, "refresh for stale or missing user");
            Err(AppError::unauthorized(SESSION_EXPIRED))
        }
    }
}

/// Stores a hashed reset token and mails the plaintext link. If the mail
/// cannot be sent the reset fields are cleared again.
#[instrument(skip(state, req))]
pub async fn forgot_password(
    state: &AppState,
    req: ForgotPasswordRequest,
    origin: &str,
) -> AppResult<()> {
    let email = normalize_email(&req.email);
    let Some(user) = state.users.find_by_email(&email).await? else {
        return Err(AppError::not_found("There is no user with that email address."));
    };

    let now = OffsetDateTime::now_utc();
    let reset = ResetToken::generate(now, Duration::minutes(state.config.reset_ttl_minutes));
    state
        .users
        .set_password_reset(user.id, &reset.hash, reset.expires_at)
        .await?;

    let url = format!("{origin}{BASE_PATH}/resetPassword/{}", reset.plain);
    let email = Email {
        from: state.mail_sender(),
        to: user.email.clone(),
        subject: "Reset Password".into(),
        text: format!(
            "Forgot your password? Submit a PATCH request with your new password and \
             confirmPassword to: {url}\nIf you didn't forget your password, please ignore this email!"
        ),
    };

    if let Err(send_err) = state.mailer.send(email).await {
        warn!(user_id = %user.id, error = %send_err, "reset mail failed; rolling back");
        if let Err(e) = state.users.clear_password_reset(user.id, &reset.hash).await {
            error!(user_id = %user.id, error = %e, "reset rollback failed");
        }
        return Err(send_err.into());
    }

    info!(user_id = %user.id, "password reset requested");
    Ok(())
}

/// Sets a new password for the holder of a live reset token. The token is
/// checked and cleared in the same store write, so it works exactly once.
#[instrument(skip_all)]
pub async fn reset_password(
    state: &AppState,
    token: &str,
    req: ResetPasswordRequest,
) -> AppResult<User> {
    let password = NewPassword::parse(req.password, &req.confirm_password)?;
    let hash = hash_password_blocking(password.into_inner()).await?;

    let now = OffsetDateTime::now_utc();
    let Some(user) = state
        .users
        .consume_reset_token(&hash_reset_token(token), now, &hash, password_stamp(now))
        .await?
    else {
        warn!("reset with unknown or expired token");
        return Err(AppError::InvalidOrExpired);
    };

    info!(user_id = %user.id, "password reset completed");
    Ok(user)
}

#[instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn update_password(
    state: &AppState,
    user: User,
    req: UpdatePasswordRequest,
) -> AppResult<User> {
    if !verify_password_blocking(req.current_password, user.password_hash.clone()).await? {
        warn!("password update with wrong current password");
        return Err(AppError::unauthorized("Your current password is wrong."));
    }

    let password = NewPassword::parse(req.password, &req.confirm_password)?;
    let hash = hash_password_blocking(password.into_inner()).await?;
    let updated = state
        .users
        .set_password(user.id, &hash, password_stamp(OffsetDateTime::now_utc()))
        .await?;

    info!("password updated");
    Ok(updated)
}
