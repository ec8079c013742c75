use std::ops::RangeInclusive;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Development,
    Production,
}

impl RunMode {
    pub fn is_production(self) -> bool {
        matches!(self, RunMode::Production)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(RunMode::Production),
            "development" | "dev" => Ok(RunMode::Development),
            other => anyhow::bail!("unknown APP_ENV {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Absolute lifetime of the refresh cookie.
    pub ttl_days: i64,
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from_name: String,
    pub from_address: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub mode: RunMode,
    pub jwt: JwtConfig,
    pub cookie: CookieConfig,
    pub reset_ttl_minutes: i64,
    pub mail: MailConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let mode: RunMode = env_or("APP_ENV", RunMode::Development)?;

        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "freshcart".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "freshcart-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let cookie = CookieConfig {
            ttl_days: env_or("JWT_COOKIE_TTL_DAYS", 14)?,
            secure: mode.is_production(),
        };

        let mail = MailConfig {
            from_name: std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "FreshCart".into()),
            from_address: required("MAIL_FROM_ADDRESS")?,
            region: std::env::var("MAIL_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let storage = StorageConfig {
            endpoint: required("MINIO_ENDPOINT")?,
            bucket: required("MINIO_BUCKET")?,
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };

        let config = Self {
            database_url,
            mode,
            jwt,
            cookie,
            reset_ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", 10)?,
            mail,
            storage,
        };
        config.validate()?;
        Ok(config)
    }

    /// Every lifetime must be positive and small enough that adding it to
    /// the current time stays in range.
    pub fn validate(&self) -> anyhow::Result<()> {
        within("JWT_TTL_MINUTES", self.jwt.ttl_minutes, ACCESS_TTL_MINUTES)?;
        within(
            "JWT_REFRESH_TTL_MINUTES",
            self.jwt.refresh_ttl_minutes,
            REFRESH_TTL_MINUTES,
        )?;
        within("JWT_COOKIE_TTL_DAYS", self.cookie.ttl_days, COOKIE_TTL_DAYS)?;
        within(
            "RESET_TOKEN_TTL_MINUTES",
            self.reset_ttl_minutes,
            RESET_TTL_MINUTES,
        )?;
        Ok(())
    }

    /// Scheme used when building links that are mailed to users.
    pub fn public_scheme(&self) -> &'static str {
        if self.mode.is_production() {
            "https"
        } else {
            "http"
        }
    }
}

const ACCESS_TTL_MINUTES: RangeInclusive<i64> = 1..=24 * 60;
const REFRESH_TTL_MINUTES: RangeInclusive<i64> = 1..=365 * 24 * 60;
const COOKIE_TTL_DAYS: RangeInclusive<i64> = 1..=365;
const RESET_TTL_MINUTES: RangeInclusive<i64> = 1..=24 * 60;

fn within(key: &str, value: i64, range: RangeInclusive<i64>) -> anyhow::Result<()> {
    if !range.contains(&value) {
        anyhow::bail!(
            "{key} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
