use serde::Serialize;

use super::repo_types::PublicUser;

/// Public user plus a temporary link to their avatar.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}
