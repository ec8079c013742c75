//! In-process credential store backing the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{StoreError, StoreResult, UserStore};
use super::repo_types::{NewUser, Role, User};

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct mutation hook for tests that need to age or promote a record.
    pub fn update<F: FnOnce(&mut User)>(&self, id: Uuid, f: F) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            f(user);
        }
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == new.email) {
            return Err(StoreError::EmailTaken);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            role: Role::default(),
            image: None,
            password_changed_at: Some(new.password_changed_at),
            password_reset_token: None,
            password_reset_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_password(
        &self,
        id: Uuid,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<User> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_hash = hash.to_string();
        user.password_changed_at = Some(changed_at);
        Ok(user.clone())
    }

    async fn set_image(&self, id: Uuid, key: &str) -> StoreResult<(User, Option<String>)> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let previous = user.image.replace(key.to_string());
        Ok((user.clone(), previous))
    }

    async fn set_password_reset(
        &self,
        id: Uuid,
        token_hash: &str,
        expires: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.password_reset_token = Some(token_hash.to_string());
        user.password_reset_expires = Some(expires);
        Ok(())
    }

    async fn clear_password_reset(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(&id) {
            if user.password_reset_token.as_deref() == Some(token_hash) {
                user.password_reset_token = None;
                user.password_reset_expires = None;
            }
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        hash: &str,
        changed_at: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.values_mut().find(|u| {
            u.password_reset_token.as_deref() == Some(token_hash)
                && u.password_reset_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        user.password_hash = hash.to_string();
        user.password_changed_at = Some(changed_at);
        user.password_reset_token = None;
        user.password_reset_expires = None;
        Ok(Some(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    async fn seeded(store: &MemoryUserStore) -> User {
        store
            .create(NewUser {
                name: "Ada".into(),
                email: "ada@x.com".into(),
                password_hash: "old".into(),
                password_changed_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reset_token_is_consumed_once() {
        let store = MemoryUserStore::new();
        let user = seeded(&store).await;
        let now = OffsetDateTime::now_utc();
        store
            .set_password_reset(user.id, "tok", now + Duration::minutes(10))
            .await
            .unwrap();

        let first = store
            .consume_reset_token("tok", now, "new", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.password_hash, "new");
        assert!(first.password_reset_token.is_none());
        assert!(first.password_reset_expires.is_none());

        let second = store
            .consume_reset_token("tok", now, "hijack", now)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.get(user.id).unwrap().password_hash, "new");
    }

    #[tokio::test]
    async fn expired_reset_token_is_not_consumed() {
        let store = MemoryUserStore::new();
        let user = seeded(&store).await;
        let now = OffsetDateTime::now_utc();
        store.set_password_reset(user.id, "tok", now).await.unwrap();

        assert!(store
            .consume_reset_token("tok", now, "new", now)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get(user.id).unwrap().password_hash, "old");
    }

    #[tokio::test]
    async fn clearing_a_replaced_reset_token_keeps_the_new_one() {
        let store = MemoryUserStore::new();
        let user = seeded(&store).await;
        let expires = OffsetDateTime::now_utc() + Duration::minutes(10);
        store.set_password_reset(user.id, "first", expires).await.unwrap();
        store.set_password_reset(user.id, "second", expires).await.unwrap();

        store.clear_password_reset(user.id, "first").await.unwrap();
        assert_eq!(
            store.get(user.id).unwrap().password_reset_token.as_deref(),
            Some("second")
        );

        store.clear_password_reset(user.id, "second").await.unwrap();
        let stored = store.get(user.id).unwrap();
        assert!(stored.password_reset_token.is_none());
        assert!(stored.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn image_swap_touches_only_the_image() {
        let store = MemoryUserStore::new();
        let user = seeded(&store).await;
        store.set_password(user.id, "newer", user.created_at).await.unwrap();

        let (updated, previous) = store.set_image(user.id, "a.png").await.unwrap();
        assert!(previous.is_none());
        assert_eq!(updated.password_hash, "newer");
        let (_, previous) = store.set_image(user.id, "b.png").await.unwrap();
        assert_eq!(previous.as_deref(), Some("a.png"));

        assert!(matches!(
            store.set_image(Uuid::new_v4(), "c.png").await,
            Err(StoreError::NotFound)
        ));
    }
}
