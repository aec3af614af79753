//! Revocation registry
//!
//! Persisted set of access tokens invalidated before their natural expiry.
//! Each entry remembers that expiry so it can be pruned once the token would
//! have been rejected anyway.

use chrono::{DateTime, Duration, Utc};
use shopauth_core::{RevokedTokenRecord, RevokedTokenRepository, StoreError};
use std::sync::Arc;

use super::digest::token_digest;

/// First instant at which a token with this `exp` no longer verifies.
///
/// `exp` has whole-second precision and verification accepts the token
/// through the end of that second.
pub fn verifying_until(expires_at: DateTime<Utc>) -> DateTime<Utc> {
    expires_at
        .checked_add_signed(Duration::seconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Clone)]
pub struct RevocationRegistry {
    repository: Arc<dyn RevokedTokenRepository>,
}

impl RevocationRegistry {
    pub fn new(repository: Arc<dyn RevokedTokenRepository>) -> Self {
        Self { repository }
    }

    /// Revoke a token whose `exp` claim is `expires_at`. Idempotent.
    ///
    /// The entry is kept until the token stops verifying, see [`verifying_until`].
    pub async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.repository
            .revoke(RevokedTokenRecord {
                token_hash: token_digest(token),
                expires_at: verifying_until(expires_at),
                revoked_at: Utc::now(),
            })
            .await
    }

    /// Point lookup on the presented token
    pub async fn is_revoked(&self, token: &str) -> Result<bool, StoreError> {
        self.repository.is_revoked(&token_digest(token)).await
    }

    /// Delete entries whose original expiry is before `now`
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.repository.delete_expired_before(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DurationRound;
    use shopauth_core::MemoryStore;

    #[tokio::test]
    async fn test_revoke_twice_stays_revoked() {
        let registry = RevocationRegistry::new(Arc::new(MemoryStore::new()));
        let exp = Utc::now() + Duration::minutes(10);

        assert!(!registry.is_revoked("token-a").await.unwrap());
        registry.revoke("token-a", exp).await.unwrap();
        registry.revoke("token-a", exp).await.unwrap();
        assert!(registry.is_revoked("token-a").await.unwrap());
        assert!(!registry.is_revoked("token-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_only_removes_expired() {
        let backend = Arc::new(MemoryStore::new());
        let registry = RevocationRegistry::new(backend.clone());
        let now = Utc::now();

        registry.revoke("old", now - Duration::seconds(5)).await.unwrap();
        registry.revoke("live", now + Duration::hours(1)).await.unwrap();

        assert_eq!(registry.prune_expired(now).await.unwrap(), 1);
        assert!(!registry.is_revoked("old").await.unwrap());
        assert!(registry.is_revoked("live").await.unwrap());
        assert_eq!(backend.revoked_token_count().await, 1);
    }

    #[tokio::test]
    async fn test_entry_outlives_the_exp_second() {
        let registry = RevocationRegistry::new(Arc::new(MemoryStore::new()));
        let exp = Utc::now().duration_trunc(Duration::seconds(1)).unwrap();

        registry.revoke("edge", exp).await.unwrap();

        // Still verifiable at exp + 500ms, so the entry must survive
        let removed = registry
            .prune_expired(exp + Duration::milliseconds(500))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(registry.is_revoked("edge").await.unwrap());

        let removed = registry
            .prune_expired(exp + Duration::milliseconds(1001))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!registry.is_revoked("edge").await.unwrap());
    }

    #[test]
    fn test_verifying_until_saturates() {
        let exp = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(verifying_until(exp).timestamp(), 1_700_000_001);
        assert_eq!(verifying_until(DateTime::<Utc>::MAX_UTC), DateTime::<Utc>::MAX_UTC);
    }
}
