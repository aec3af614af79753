//! Application state management
//!
//! Author: hephaex@gmail.com

use shopauth_core::{AppConfig, AuthBackend, PasswordHasher, StoreHealth};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::{
    AccessTokenCodec, AuthenticationService, CleanupScheduler, RefreshTokenStore,
    RequestAuthenticator, RevocationRegistry, TokenError,
};

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Server start time
    pub start_time: Instant,
    /// Request counter
    pub request_count: AtomicU64,
    /// Login, registration, refresh and logout
    pub auth: Arc<AuthenticationService>,
    /// Bearer token resolution for the authentication middleware
    pub authenticator: RequestAuthenticator,
    /// Store connectivity probe
    health: Arc<dyn StoreHealth>,
}

impl AppState {
    /// Wire the authentication components over one backend
    pub fn new<B>(
        config: AppConfig,
        backend: Arc<B>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self, TokenError>
    where
        B: AuthBackend + 'static,
    {
        let codec = AccessTokenCodec::from_config(&config.auth)?;
        let refresh_tokens =
            RefreshTokenStore::new(backend.clone(), config.auth.refresh_token_ttl());
        let revocations = RevocationRegistry::new(backend.clone());

        let auth = AuthenticationService::new(
            backend.clone(),
            backend.clone(),
            hasher,
            codec.clone(),
            refresh_tokens,
            revocations.clone(),
            &config.auth,
        );
        let authenticator = RequestAuthenticator::new(codec, revocations, backend.clone());

        Ok(Self {
            config,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            auth: Arc::new(auth),
            authenticator,
            health: backend,
        })
    }

    /// Cleanup jobs over the same token tables the service writes
    pub fn cleanup_scheduler(&self) -> CleanupScheduler {
        CleanupScheduler::new(
            self.auth.refresh_tokens().clone(),
            self.auth.revocations().clone(),
            self.config.cleanup.clone(),
        )
    }

    /// Increment request counter
    pub fn increment_requests(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst)
    }

    /// Get total request count
    pub fn get_request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check that the backing store answers
    pub async fn store_ready(&self) -> bool {
        match self.health.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Store readiness check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Argon2PasswordHasher, PasswordConfig};
    use shopauth_core::MemoryStore;

    #[tokio::test]
    async fn test_state_wiring() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(Argon2PasswordHasher::new(&PasswordConfig::light()).unwrap()),
        )
        .unwrap();

        assert!(state.store_ready().await);
        assert_eq!(state.increment_requests(), 0);
        assert_eq!(state.get_request_count(), 1);
        assert_eq!(state.auth.codec().ttl(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_state_rejects_empty_secret() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = String::new();
        let result = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(Argon2PasswordHasher::default()),
        );
        assert!(result.is_err());
    }
}
