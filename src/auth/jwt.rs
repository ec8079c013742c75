use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::{Claims, TokenKind, VerifiedToken};
use crate::config::JwtConfig;
use crate::error::AppError;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("expected a {expected:?} token")]
    WrongKind { expected: TokenKind },
    #[error("failed to sign token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
}

/// Signs and verifies access/refresh tokens with one process-wide secret.
///
/// Built once from [`JwtConfig`] at start-up and shared through `AppState`.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64).saturating_mul(60)),
            refresh_ttl: Duration::from_secs(
                (cfg.refresh_ttl_minutes.max(0) as u64).saturating_mul(60),
            ),
        }
    }

    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, kind: TokenKind) -> Result<String, TokenError> {
        self.issue_at(user_id, kind, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        now: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let exp = now + TimeDuration::seconds(self.lifetime(kind).as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue(user_id, TokenKind::Access)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue(user_id, TokenKind::Refresh)
    }

    /// Checks signature, expiry, issuer and audience in one step. The
    /// signature is checked first, so a forged token is `Invalid` whatever
    /// its `exp` says.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims.into())
    }

    pub fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<VerifiedToken, TokenError> {
        let verified = self.verify(token)?;
        if verified.kind != expected {
            return Err(TokenError::WrongKind { expected });
        }
        Ok(verified)
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Encoding(e) => AppError::Internal(anyhow::Error::new(e)),
            _ => AppError::unauthorized("Invalid token. Please log in again!"),
        }
    }
}
