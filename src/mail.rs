use axum::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_sdk_sesv2::{
    config::Region,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::config::MailConfig;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.address)
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub from: Mailbox,
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("failed to send message: {0}")]
    Send(String),
}

impl From<MailError> for AppError {
    fn from(_: MailError) -> Self {
        AppError::Transport
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Sends plain-text mail through AWS SES v2.
#[derive(Clone)]
pub struct SesMailer {
    client: Client,
}

impl SesMailer {
    pub async fn new(cfg: &MailConfig) -> Self {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .load()
            .await;
        Self {
            client: Client::new(&shared),
        }
    }
}

#[async_trait]
impl Mailer for SesMailer {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let subject = Content::builder()
            .data(&email.subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| MailError::Build(e.to_string()))?;
        let text = Content::builder()
            .data(&email.text)
            .charset("UTF-8")
            .build()
            .map_err(|e| MailError::Build(e.to_string()))?;

        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();

        let out = self
            .client
            .send_email()
            .from_email_address(email.from.to_string())
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "SES send failed");
                MailError::Send(e.to_string())
            })?;

        info!(message_id = out.message_id().unwrap_or("unknown"), "mail sent");
        Ok(())
    }
}
