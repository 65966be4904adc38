//! Session tokens for the API gate.
//!
//! The engine owns only the secret material (see `storage::account`); the
//! HTTP layer in front of it calls these helpers to mint and check tokens.
//! Tokens are JWTs signed with the current secret, so a secret rotation
//! invalidates every outstanding session.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Authenticated principal (operator or API user name).
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_session_token(secret: &[u8], subject: &str, ttl: Duration) -> Result<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: subject.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .context("failed to sign session token")
}

pub fn verify_session_token(secret: &[u8], token: &str) -> Result<SessionClaims> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )
    .context("session token rejected")?;
    Ok(data.claims)
}
