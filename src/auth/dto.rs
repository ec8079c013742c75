use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::users::repo_types::PublicUser;

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A new password that passed length and confirmation checks.
#[derive(Debug)]
pub struct NewPassword(String);

impl NewPassword {
    pub fn parse(password: String, confirm: &str) -> Result<Self, AppError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        if password != confirm {
            return Err(AppError::validation("Passwords are not the same!"));
        }
        Ok(Self(password))
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Signup input after validation.
#[derive(Debug)]
pub struct ValidSignup {
    pub name: String,
    pub email: String,
    pub password: NewPassword,
}

impl SignupRequest {
    pub fn validate(self) -> Result<ValidSignup, AppError> {
        let email = normalize_email(&self.email);
        if !is_valid_email(&email) {
            return Err(AppError::validation("Please provide a valid email"));
        }
        // name is optional; default to the mailbox part
        let name = match self.name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            n => n.to_string(),
        };
        let password = NewPassword::parse(self.password, &self.confirm_password)?;
        Ok(ValidSignup {
            name,
            email,
            password,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// `{status, data}` envelope used by every successful response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "success",
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl StatusMessage {
    pub fn success() -> Self {
        Self {
            status: "success",
            message: None,
        }
    }

    pub fn with_message(message: &'static str) -> Self {
        Self {
            status: "success",
            message: Some(message),
        }
    }
}

/// Body returned by signup, login, reset and password update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: PublicUser,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenData {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: PublicUser,
}
