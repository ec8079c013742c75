use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

/// Full user record as held by the credential store.
///
/// Deliberately not `Serialize`: anything leaving the process goes through
/// [`PublicUser`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub image: Option<String>,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Change timestamp recorded with a newly set password. Backdated by a
/// second so a token minted right after the change (same unix second) is
/// still accepted.
pub fn password_stamp(now: OffsetDateTime) -> OffsetDateTime {
    now - Duration::seconds(1)
}

impl User {
    /// True when the password was changed after a token issued at `iat`.
    pub fn changed_password_after(&self, iat: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.unix_timestamp() > iat)
            .unwrap_or(false)
    }

    pub fn has_role(&self, permitted: &[Role]) -> bool {
        permitted.contains(&self.role)
    }
}

/// Row shape in Postgres; `role` is stored as text.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub image: Option<String>,
    pub password_changed_at: Option<OffsetDateTime>,
    pub password_reset_token: Option<String>,
    pub password_reset_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            email: r.email,
            password_hash: r.password_hash,
            role: r.role.parse()?,
            image: r.image,
            password_changed_at: r.password_changed_at,
            password_reset_token: r.password_reset_token,
            password_reset_expires: r.password_reset_expires,
            created_at: r.created_at,
        })
    }
}

/// Fields needed to create a user. The hash is computed before this exists.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub password_changed_at: OffsetDateTime,
}

/// The only user shape that is ever serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub image: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
            image: u.image.clone(),
            created_at: u.created_at,
        }
    }
}
