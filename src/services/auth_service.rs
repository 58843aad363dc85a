use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    errors::AuthError,
    models::{jwt::TokenPair, user::Principal},
    services::{credential_service::CredentialService, identity::IdentityStore},
};

/// Password login, registration and password changes on top of the identity store.
#[derive(Clone)]
pub struct AuthService {
    identity: Arc<dyn IdentityStore>,
    credentials: CredentialService,
}

impl AuthService {
    pub fn new(identity: Arc<dyn IdentityStore>, credentials: CredentialService) -> Self {
        Self {
            identity,
            credentials,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(Principal, TokenPair), AuthError> {
        let user = self
            .identity
            .lookup_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !self.identity.verify_password(&user, password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.credentials.issue(user.id, &user.email).await?;

        info!(user_id = user.id, "User logged in");
        Ok((user, tokens))
    }

    #[instrument(skip(self, name, password))]
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<(Principal, TokenPair), AuthError> {
        let user = self.identity.create_principal(email, name, password).await?;
        let tokens = self.credentials.issue(user.id, &user.email).await?;

        Ok((user, tokens))
    }

    /// Replace the principal's password after checking the current one, then
    /// end every session: the refresh chain is dropped and `presented_token`
    /// is revoked.
    #[instrument(skip_all, fields(user_id = principal.id))]
    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
        presented_token: &str,
    ) -> Result<(), AuthError> {
        if !self.identity.verify_password(principal, current_password).await? {
            return Err(AuthError::InvalidCredentials);
        }

        self.identity.update_password(principal.id, new_password).await?;
        self.credentials.revoke_all(principal.id).await?;
        self.credentials.revoke(presented_token).await;

        info!("Password changed");
        Ok(())
    }
}
