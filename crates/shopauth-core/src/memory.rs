//! In-memory store backend
//!
//! Keeps principals, roles and token records in process memory behind a
//! single `RwLock`. Used for development when no database is configured and
//! by the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::{
    CredentialStore, NewPrincipal, Principal, PrincipalId, RefreshTokenRecord,
    RefreshTokenRepository, Result, RevokedTokenRecord, RevokedTokenRepository, Role, RoleStore,
    StoreError, StoreHealth, ROLE_ADMIN, ROLE_USER,
};

#[derive(Default)]
struct MemoryState {
    principals: HashMap<PrincipalId, Principal>,
    usernames: HashMap<String, PrincipalId>,
    roles: HashMap<String, Role>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    revoked_tokens: HashMap<String, RevokedTokenRecord>,
    next_principal_id: PrincipalId,
}

/// Process-local store implementing every backend trait
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Create a store seeded with `ROLE_USER` and `ROLE_ADMIN`
    pub fn new() -> Self {
        Self::with_roles(&[ROLE_USER, ROLE_ADMIN])
    }

    /// Create a store seeded with the given role names
    pub fn with_roles(roles: &[&str]) -> Self {
        let mut state = MemoryState {
            next_principal_id: 1,
            ..Default::default()
        };
        for (idx, name) in roles.iter().enumerate() {
            state.roles.insert(
                name.to_string(),
                Role {
                    id: idx as i32 + 1,
                    name: name.to_string(),
                },
            );
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Number of stored refresh token records
    pub async fn refresh_token_count(&self) -> usize {
        self.state.read().await.refresh_tokens.len()
    }

    /// Number of stored revocations
    pub async fn revoked_token_count(&self) -> usize {
        self.state.read().await.revoked_tokens.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let state = self.state.read().await;
        Ok(state
            .usernames
            .get(username)
            .and_then(|id| state.principals.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>> {
        Ok(self.state.read().await.principals.get(&id).cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        Ok(self.state.read().await.usernames.contains_key(username))
    }

    async fn save(&self, principal: NewPrincipal) -> Result<Principal> {
        let mut state = self.state.write().await;
        if state.usernames.contains_key(&principal.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                principal.username
            )));
        }

        let id = state.next_principal_id;
        state.next_principal_id += 1;

        let saved = Principal {
            id,
            username: principal.username,
            password_hash: principal.password_hash,
            roles: principal.roles,
        };
        state.usernames.insert(saved.username.clone(), id);
        state.principals.insert(id, saved.clone());
        Ok(saved)
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(name).cloned())
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryStore {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.refresh_tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Conflict("refresh token already exists".to_string()));
        }
        state.refresh_tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.state.read().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn take(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.state.write().await.refresh_tokens.remove(token_hash))
    }

    async fn delete_all_for_principal(&self, principal_id: PrincipalId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.refresh_tokens.len();
        state
            .refresh_tokens
            .retain(|_, record| record.principal_id != principal_id);
        Ok((before - state.refresh_tokens.len()) as u64)
    }

    async fn count_for_principal(&self, principal_id: PrincipalId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .refresh_tokens
            .values()
            .filter(|record| record.principal_id == principal_id)
            .count() as u64)
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, record| record.expires_at >= now);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[async_trait]
impl RevokedTokenRepository for MemoryStore {
    async fn revoke(&self, record: RevokedTokenRecord) -> Result<()> {
        self.state
            .write()
            .await
            .revoked_tokens
            .entry(record.token_hash.clone())
            .or_insert(record);
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .revoked_tokens
            .contains_key(token_hash))
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.revoked_tokens.len();
        state.revoked_tokens.retain(|_, record| record.expires_at >= now);
        Ok((before - state.revoked_tokens.len()) as u64)
    }
}

#[async_trait]
impl StoreHealth for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
