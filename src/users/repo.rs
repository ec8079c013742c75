use axum::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{NewUser, Role, User, UserRow};
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    EmailTaken,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Corrupt(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmailTaken => AppError::Conflict("Email already registered".into()),
            StoreError::NotFound => AppError::not_found("No user found with that ID"),
            StoreError::Database(e) => AppError::Internal(anyhow::Error::new(e)),
            StoreError::Corrupt(e) => AppError::Internal(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Credential store. Every write touches only the columns it names; none
/// takes a whole `User`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn create(&self, new: NewUser) -> StoreResult<User>;
    async fn set_password(
        &self,
        id: Uuid,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<User>;
    /// Points the user at a new avatar key, returning the updated user and
    /// the key it replaced.
    async fn set_image(&self, id: Uuid, key: &str) -> StoreResult<(User, Option<String>)>;
    async fn set_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<()>;
    /// Clears the reset fields only while they still hold `token_hash`.
    async fn clear_password_reset(&self, id: Uuid, token_hash: &str) -> StoreResult<()>;
    /// Swaps in `hash` for whoever holds `token_hash` with a window still open
    /// at `now`, clearing the token in the same write. `None` when no live
    /// token matches.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>>;
}

const USER_COLUMNS: &str = "id, name, email, password_hash, role, image, password_changed_at, \
     password_reset_token, password_reset_expires, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(User::try_from).transpose()?)
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (name, email, password_hash, role, password_changed_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(Role::default().as_str())
            .bind(new.password_changed_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::EmailTaken,
                other => StoreError::Database(other),
            })?;
        Ok(User::try_from(row)?)
    }

    async fn set_password(
        &self,
        id: Uuid,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<User> {
        let sql = format!(
            r#"
            UPDATE users
               SET password_hash = $2,
                   password_changed_at = $3
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(hash)
            .bind(changed_at)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(User::try_from(row)?)
    }

    async fn set_image(&self, id: Uuid, key: &str) -> StoreResult<(User, Option<String>)> {
        let row = sqlx::query_as::<_, ImageSwapRow>(
            r#"
            WITH prev AS (
                SELECT id, image FROM users WHERE id = $1 FOR UPDATE
            )
            UPDATE users u
               SET image = $2
              FROM prev
             WHERE u.id = prev.id
            RETURNING u.id, u.name, u.email, u.password_hash, u.role, u.image,
                      u.password_changed_at, u.password_reset_token,
                      u.password_reset_expires, u.created_at,
                      prev.image AS previous_image
            "#,
        )
        .bind(id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)?;
        Ok((User::try_from(row.user)?, row.previous_image))
    }

    async fn set_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
               SET password_reset_token = $2,
                   password_reset_expires = $3
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn clear_password_reset(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET password_reset_token = NULL,
                   password_reset_expires = NULL
             WHERE id = $1
               AND password_reset_token = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            r#"
            UPDATE users
               SET password_hash = $1,
                   password_changed_at = $2,
                   password_reset_token = NULL,
                   password_reset_expires = NULL
             WHERE password_reset_token = $3
               AND password_reset_expires > $4
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(hash)
            .bind(changed_at)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(User::try_from).transpose()?)
    }
}

#[derive(FromRow)]
struct ImageSwapRow {
    #[sqlx(flatten)]
    user: UserRow,
    previous_image: Option<String>,
}
