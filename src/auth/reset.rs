//! One-time password reset tokens.
//!
//! The plaintext goes to the user by mail; only `sha256(plaintext)` is stored.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

const TOKEN_BYTES: usize = 32;

pub struct ResetToken {
    pub plain: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

impl ResetToken {
    pub fn generate(now: OffsetDateTime, ttl: Duration) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plain = hex::encode(bytes);
        let hash = hash_reset_token(&plain);
        Self {
            plain,
            hash,
            expires_at: now + ttl,
        }
    }
}

pub fn hash_reset_token(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}
