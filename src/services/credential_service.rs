// src/services/credential_service.rs
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::TokenConfig,
    db::KeyValueStore,
    errors::AuthError,
    models::{
        jwt::{AccessGrant, Claims, TOKEN_TYPE, TokenKind, TokenPair},
        user::Principal,
    },
    services::identity::IdentityStore,
    utils::clock::Clock,
};

const REVOKED_SENTINEL: &str = "1";

fn refresh_key(user_id: i64) -> String {
    format!("refresh_token:{user_id}")
}

fn revoked_key(token: &str) -> String {
    format!("blacklist:{token}")
}

/// Issues, verifies, refreshes and revokes bearer tokens.
///
/// Holds no token state of its own; refresh records and revocation entries
/// live in the shared store.
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn KeyValueStore>,
    identity: Arc<dyn IdentityStore>,
    clock: Arc<dyn Clock>,
    enc_key: EncodingKey,
    dec_key: DecodingKey,
    access_ttl: u64,
    refresh_ttl: u64,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
        config: &TokenConfig,
    ) -> Self {
        let enc_key = EncodingKey::from_secret(config.secret.as_bytes());
        let dec_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            store,
            identity,
            clock,
            enc_key,
            dec_key,
            access_ttl: config.access_ttl_secs,
            refresh_ttl: config.refresh_ttl_secs,
        }
    }

    /* ---------- PUBLIC API ---------- */

    /// Mint an access/refresh pair and make the refresh token the subject's
    /// only redeemable one.
    #[instrument(skip(self, email))]
    pub async fn issue(&self, user_id: i64, email: &str) -> Result<TokenPair, AuthError> {
        let now = self.clock.now();
        let access_token =
            self.create_jwt(&Claims::new(user_id, email, TokenKind::Access, now, self.access_ttl))?;
        let refresh_token =
            self.create_jwt(&Claims::new(user_id, email, TokenKind::Refresh, now, self.refresh_ttl))?;

        self.store
            .set_ex(&refresh_key(user_id), &refresh_token, self.refresh_ttl)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to store refresh record");
                e
            })?;

        info!("Issued token pair");
        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE,
            expires_in: self.access_ttl,
        })
    }

    /// Validate a token of the expected kind and return its claims.
    ///
    /// Checks run in a fixed order: revocation, signature, expiry, kind.
    #[instrument(skip(self, token))]
    pub async fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AuthError> {
        if self.is_revoked(token).await {
            return Err(AuthError::Revoked);
        }

        let claims = self.decode_jwt(token)?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }
        if claims.kind != expected {
            return Err(AuthError::WrongKind);
        }

        Ok(claims)
    }

    /// Exchange the subject's current refresh token for a new access token.
    /// The refresh token itself is not rotated.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, AuthError> {
        let claims = self.verify(refresh_token, TokenKind::Refresh).await?;

        let stored = self.store.get(&refresh_key(claims.sub)).await.map_err(|e| {
            error!(error = %e, user_id = claims.sub, "Failed to read refresh record");
            AuthError::SupersededOrMissing
        })?;
        if stored.as_deref() != Some(refresh_token) {
            return Err(AuthError::SupersededOrMissing);
        }

        let now = self.clock.now();
        let access_token = self.create_jwt(&Claims::new(
            claims.sub,
            &claims.email,
            TokenKind::Access,
            now,
            self.access_ttl,
        ))?;

        info!(user_id = claims.sub, "Refreshed access token");
        Ok(AccessGrant {
            access_token,
            token_type: TOKEN_TYPE,
            expires_in: self.access_ttl,
        })
    }

    /// Mark a token unusable for the rest of its lifetime.
    ///
    /// Best effort: failures are logged and never reach the caller.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str) {
        let claims = match self.decode_jwt(token) {
            Ok(claims) => claims,
            Err(_) => {
                debug!("Ignoring revocation of undecodable token");
                return;
            }
        };

        let ttl = claims.remaining_secs(self.clock.now());
        if ttl == 0 {
            debug!(user_id = claims.sub, "Token already expired, nothing to revoke");
            return;
        }

        let key = revoked_key(token);
        match self.store.get(&key).await {
            Ok(Some(_)) => {
                debug!(user_id = claims.sub, "Token already revoked");
                return;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read revocation entry, writing anyway"),
        }

        match self.store.set_ex(&key, REVOKED_SENTINEL, ttl).await {
            Ok(()) => info!(user_id = claims.sub, kind = %claims.kind, ttl, "Revoked token"),
            Err(e) => error!(error = %e, user_id = claims.sub, "Failed to revoke token"),
        }
    }

    /// Drop the subject's refresh record. Access tokens already handed out
    /// stay valid until they expire.
    #[instrument(skip(self))]
    pub async fn revoke_all(&self, user_id: i64) -> Result<(), AuthError> {
        self.store.delete(&refresh_key(user_id)).await.map_err(|e| {
            error!(error = %e, "Failed to delete refresh record");
            e
        })?;

        info!("Revoked refresh chain");
        Ok(())
    }

    /// Resolve an access token to the principal it was issued for.
    #[instrument(skip(self, token))]
    pub async fn identity_from_token(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.verify(token, TokenKind::Access).await?;

        self.identity
            .lookup_by_id(claims.sub)
            .await?
            .ok_or(AuthError::PrincipalNotFound)
    }

    /* ---------- PRIVATE HELPERS ---------- */

    async fn is_revoked(&self, token: &str) -> bool {
        match self.store.get(&revoked_key(token)).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                error!(error = %e, "Failed to check token revocation");
                false
            }
        }
    }

    fn create_jwt(&self, claims: &Claims) -> Result<String, AuthError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.enc_key)?)
    }

    /// Signature and structure only; expiry is judged against our own clock.
    fn decode_jwt(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;

        decode::<Claims>(token, &self.dec_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Token failed to decode");
                AuthError::Malformed
            })
    }
}
