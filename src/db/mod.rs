use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable")]
    Unavailable,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One sliding-window admission attempt against a sorted set.
///
/// Scores are fractional UTC seconds. Members with a score at or below
/// `window_start` are pruned before counting.
#[derive(Debug, Clone)]
pub struct WindowAdmission<'a> {
    pub key: &'a str,
    pub member: &'a str,
    pub now: f64,
    pub window_start: f64,
    pub limit: u32,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Recorded; `count` includes the new entry.
    Admitted { count: u32 },
    /// Not recorded; `count` is the size of the pruned window.
    Rejected { count: u32 },
}

/// Shared key/value store with expiring keys and an atomic sliding-window
/// primitive. Implementations must run `admit_in_window` as one atomic unit
/// per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn admit_in_window(&self, admission: WindowAdmission<'_>) -> StoreResult<WindowOutcome>;

    async fn ping(&self) -> StoreResult<()>;
}

pub async fn create_db_pool(db_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

    Ok(pool)
}
