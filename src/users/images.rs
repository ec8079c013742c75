use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::User;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const URL_TTL_SECS: u64 = 30 * 60;

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn avatar_key(user_id: Uuid, ext: &str) -> String {
    format!("users/{}/avatar-{}.{}", user_id, Uuid::new_v4(), ext)
}

/// Uploads a new avatar, points the user at it and drops the old object.
pub async fn replace_avatar(
    st: &AppState,
    user: User,
    body: Bytes,
    content_type: &str,
) -> AppResult<User> {
    let ext = ext_from_mime(content_type)
        .ok_or_else(|| AppError::validation("Not an image! Please upload only images."))?;
    if body.is_empty() {
        return Err(AppError::validation("Please upload an image"));
    }

    let key = avatar_key(user.id, ext);
    st.storage
        .put_object(&key, body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let (updated, previous) = match st.users.set_image(user.id, &key).await {
        Ok(swap) => swap,
        Err(e) => {
            if let Err(del) = st.storage.delete_object(&key).await {
                warn!(error = %del, %key, "orphaned avatar upload");
            }
            return Err(e.into());
        }
    };

    if let Some(old) = previous {
        if let Err(e) = st.storage.delete_object(&old).await {
            warn!(error = %e, key = %old, "failed to delete previous avatar");
        }
    }
    info!(user_id = %updated.id, %key, "avatar updated");
    Ok(updated)
}

/// Short-lived download link for the user's avatar, if any.
pub async fn avatar_url(st: &AppState, user: &User) -> Option<String> {
    let key = user.image.as_deref()?;
    match st.storage.presign_get(key, URL_TTL_SECS).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, %key, "presign failed");
            None
        }
    }
}
