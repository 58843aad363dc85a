use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::rate_limit::{LimitSpecError, RateLimit};

/// Upper bound for token lifetimes: ten years.
pub const MAX_TOKEN_TTL_SECS: u64 = 315_360_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error(transparent)]
    Limit(#[from] LimitSpecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default: RateLimit,
    pub register: RateLimit,
    pub login: RateLimit,
    pub refresh: RateLimit,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub store_backend: StoreBackend,
    pub store_timeout: Duration,
    pub bcrypt_cost: u32,
    pub tokens: TokenConfig,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Load from the process environment. `main` applies any `.env` file first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = match env_or("STORE_BACKEND", "redis".to_string())?.as_str() {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let secret = match env::var("JWT_SECRET_KEY") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                warn!("JWT_SECRET_KEY is not set; using an ephemeral key, issued tokens will not survive a restart");
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
            }
        };

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            database_url: env_or("DATABASE_URL", "sqlite:users.db".to_string())?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379".to_string())?,
            store_backend,
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 250)?),
            bcrypt_cost: env_or("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            tokens: TokenConfig {
                secret,
                access_ttl_secs: env_ttl("JWT_ACCESS_TOKEN_EXPIRES", 3_600)?,
                refresh_ttl_secs: env_ttl("JWT_REFRESH_TOKEN_EXPIRES", 2_592_000)?,
            },
            rate_limits: RateLimitConfig {
                enabled: env_or("RATELIMIT_ENABLED", true)?,
                default: env_limit("RATELIMIT_DEFAULT", "100 per hour")?,
                register: env_limit("RATELIMIT_REGISTER", "5 per hour")?,
                login: env_limit("RATELIMIT_LOGIN", "10 per hour")?,
                refresh: env_limit("RATELIMIT_REFRESH", "20 per hour")?,
            },
        })
    }
}

fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

fn env_limit(key: &'static str, default: &str) -> Result<RateLimit, ConfigError> {
    let spec = env::var(key).unwrap_or_else(|_| default.to_string());
    Ok(spec.parse()?)
}

fn env_ttl(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    check_ttl(key, env_or(key, default)?)
}

/// Token lifetimes must be positive (Redis refuses `SETEX 0`) and bounded.
fn check_ttl(key: &'static str, secs: u64) -> Result<u64, ConfigError> {
    if secs == 0 || secs > MAX_TOKEN_TTL_SECS {
        return Err(ConfigError::Invalid {
            key,
            value: secs.to_string(),
        });
    }
    Ok(secs)
}
