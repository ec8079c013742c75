use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::dto::ProfileData;
use super::images;
use super::repo_types::{PublicUser, User};
use crate::auth::dto::{Envelope, UserData};
use crate::auth::middleware::CurrentUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

async fn profile(state: &AppState, user: &User) -> Json<Envelope<ProfileData>> {
    Json(Envelope::success(ProfileData {
        user: PublicUser::from(user),
        image_url: images::avatar_url(state, user).await,
    }))
}

#[instrument(skip_all)]
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Envelope<ProfileData>> {
    profile(&state, &user).await
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Envelope<UserData>>> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("No user found with that ID"))?;
    Ok(Json(Envelope::success(UserData {
        user: PublicUser::from(&user),
    })))
}

/// Takes the multipart field `image`; other fields are ignored.
#[instrument(skip_all)]
pub async fn update_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> AppResult<Json<Envelope<ProfileData>>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let body = field.bytes().await.map_err(|e| {
            warn!(error = %e, "failed to read image field");
            AppError::validation(e.body_text())
        })?;

        let user = images::replace_avatar(&state, user, body, &content_type).await?;
        return Ok(profile(&state, &user).await);
    }
    Err(AppError::validation("Please upload an image"))
}
