//! Refresh token store
//!
//! Mints opaque refresh tokens and manages their persisted records.
//! A record is valid while `now < expires_at`; an expired record is deleted
//! as soon as it is observed, in addition to the scheduled sweep.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use shopauth_core::{PrincipalId, RefreshTokenRecord, RefreshTokenRepository, StoreError};
use std::sync::Arc;

use super::digest::token_digest;

/// A freshly minted refresh token and its persisted record
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    /// Opaque token handed to the client. Never persisted.
    pub token: String,
    pub record: RefreshTokenRecord,
}

/// Outcome of the expiry check on a refresh record
#[derive(Debug, thiserror::Error)]
pub enum RefreshTokenError {
    #[error("Refresh token has expired")]
    Expired,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle operations on refresh tokens
#[derive(Clone)]
pub struct RefreshTokenStore {
    repository: Arc<dyn RefreshTokenRepository>,
    ttl: Duration,
}

impl RefreshTokenStore {
    pub fn new(repository: Arc<dyn RefreshTokenRepository>, ttl: Duration) -> Self {
        Self { repository, ttl }
    }

    /// Refresh token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint and persist a new refresh token for a principal
    pub async fn create(&self, principal_id: PrincipalId) -> Result<IssuedRefreshToken, StoreError> {
        let token = generate_refresh_token();
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow::anyhow!("refresh token TTL out of range: {}", self.ttl))?;
        let record = RefreshTokenRecord {
            token_hash: token_digest(&token),
            principal_id,
            expires_at,
            created_at: now,
        };

        self.repository.insert(record.clone()).await?;
        tracing::debug!(principal_id, "Created refresh token");

        Ok(IssuedRefreshToken { token, record })
    }

    /// Look up the record for a presented token
    pub async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.repository.find_by_hash(&token_digest(token)).await
    }

    /// Pass a valid record through; delete an expired one and fail
    pub async fn verify_not_expired(
        &self,
        record: RefreshTokenRecord,
    ) -> Result<RefreshTokenRecord, RefreshTokenError> {
        if record.is_expired_at(Utc::now()) {
            self.repository.take(&record.token_hash).await?;
            tracing::debug!(
                principal_id = record.principal_id,
                "Deleted expired refresh token on access"
            );
            return Err(RefreshTokenError::Expired);
        }
        Ok(record)
    }

    /// Atomically consume a presented token. `None` if another caller got there first.
    pub async fn claim(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.repository.take(&token_digest(token)).await
    }

    /// Delete every refresh token of a principal
    pub async fn delete_all_for_principal(&self, principal_id: PrincipalId) -> Result<u64, StoreError> {
        self.repository.delete_all_for_principal(principal_id).await
    }

    /// Number of outstanding refresh tokens of a principal
    pub async fn count_for_principal(&self, principal_id: PrincipalId) -> Result<u64, StoreError> {
        self.repository.count_for_principal(principal_id).await
    }

    /// Bulk delete of records with `expires_at < now`
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.repository.delete_expired_before(now).await
    }
}

/// 256 random bits, base64url without padding
fn generate_refresh_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
