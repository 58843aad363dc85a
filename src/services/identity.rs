use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, instrument};

use crate::models::user::{Principal, User};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("email already registered")]
    EmailTaken,
    #[error("no user with id {0}")]
    UnknownUser(i64),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// User lookup and password verification, supplied by whatever owns accounts.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn lookup_by_email(&self, email: &str) -> Result<Option<Principal>, IdentityError>;

    async fn lookup_by_id(&self, id: i64) -> Result<Option<Principal>, IdentityError>;

    async fn verify_password(&self, principal: &Principal, plaintext: &str) -> Result<bool, IdentityError>;

    async fn create_principal(
        &self,
        email: &str,
        name: &str,
        plaintext: &str,
    ) -> Result<Principal, IdentityError>;

    async fn update_password(&self, id: i64, plaintext: &str) -> Result<(), IdentityError>;
}

#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
    bcrypt_cost: u32,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool, bcrypt_cost: u32) -> Self {
        Self { pool, bcrypt_cost }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn lookup_by_email(&self, email: &str) -> Result<Option<Principal>, IdentityError> {
        Ok(User::find_by_email(&self.pool, email).await?.map(Principal::from))
    }

    async fn lookup_by_id(&self, id: i64) -> Result<Option<Principal>, IdentityError> {
        Ok(User::find_by_id(&self.pool, id).await?.map(Principal::from))
    }

    #[instrument(skip(self, principal, plaintext), fields(user_id = principal.id))]
    async fn verify_password(&self, principal: &Principal, plaintext: &str) -> Result<bool, IdentityError> {
        let Some(user) = User::find_by_id(&self.pool, principal.id).await? else {
            return Ok(false);
        };

        let plaintext = plaintext.to_string();
        let matches =
            tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &user.password_hash))
                .await??;
        Ok(matches)
    }

    #[instrument(skip(self, name, plaintext))]
    async fn create_principal(
        &self,
        email: &str,
        name: &str,
        plaintext: &str,
    ) -> Result<Principal, IdentityError> {
        let cost = self.bcrypt_cost;
        let plaintext = plaintext.to_string();
        let password_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost)).await??;

        let user = User::create(&self.pool, email, name, &password_hash)
            .await
            .map_err(|e| {
                let taken = e.as_database_error().is_some_and(|db| db.is_unique_violation());
                if taken {
                    IdentityError::EmailTaken
                } else {
                    IdentityError::Database(e)
                }
            })?;

        info!(user_id = user.id, "Registered new user");
        Ok(user.into())
    }

    #[instrument(skip(self, plaintext))]
    async fn update_password(&self, id: i64, plaintext: &str) -> Result<(), IdentityError> {
        let cost = self.bcrypt_cost;
        let plaintext = plaintext.to_string();
        let password_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost)).await??;

        if !User::update_password_hash(&self.pool, id, &password_hash).await? {
            return Err(IdentityError::UnknownUser(id));
        }

        info!("Password updated");
        Ok(())
    }
}
