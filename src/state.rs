use std::sync::Arc;

use crate::auth::jwt::TokenService;
use crate::config::AppConfig;
use crate::db;
use crate::mail::{Mailbox, Mailer, SesMailer};
use crate::storage::{Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenService>,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config.database_url).await?;
        if let Err(e) = db::migrate(&pool).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;
        let mailer = Arc::new(SesMailer::new(&config.mail).await) as Arc<dyn Mailer>;
        let users = Arc::new(PgUserStore::new(pool)) as Arc<dyn UserStore>;

        Ok(Self::from_parts(config, users, mailer, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(&config.jwt));
        Self {
            config,
            users,
            tokens,
            mailer,
            storage,
        }
    }

    pub fn mail_sender(&self) -> Mailbox {
        Mailbox {
            name: self.config.mail.from_name.clone(),
            address: self.config.mail.from_address.clone(),
        }
    }
}
