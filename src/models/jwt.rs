// src/models/jwt.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,      // user id
    pub email: String, // denormalized for convenience
    pub iat: i64,      // issued at
    pub exp: i64,      // expiration time
    pub jti: String,   // keeps same-second tokens distinct
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl Claims {
    pub fn new(user_id: i64, email: &str, kind: TokenKind, now: DateTime<Utc>, ttl_secs: u64) -> Self {
        Self {
            sub: user_id,
            email: email.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp().saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            jti: Uuid::new_v4().to_string(),
            kind,
        }
    }

    /// Seconds left before `exp`, zero once expired.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.exp - now.timestamp()).max(0) as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}
