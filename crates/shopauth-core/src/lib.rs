//! shopauth core - domain models, store traits, and shared types
//!
//! This crate defines the abstractions the authentication service is built on:
//! - Principal, role and token record models
//! - Store traits for credentials, roles and the two token tables
//! - The password hashing capability
//! - Common error types
//! - Configuration management
//! - In-memory and PostgreSQL store backends

pub mod config;
pub mod memory;
pub mod postgres;

pub use config::{
    AppConfig, AuthConfig, CleanupConfig, ConfigError, DatabaseConfig, LoggingConfig, ServerConfig,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by store backends and the hashing capability
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Hashing error: {0}")]
    HashingError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Identity
// ============================================================================

/// Identity key of a principal
pub type PrincipalId = i64;

/// Role assigned to every newly registered principal
pub const ROLE_USER: &str = "ROLE_USER";

/// Administrative role
pub const ROLE_ADMIN: &str = "ROLE_ADMIN";

/// A registered identity as read from the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    /// Opaque hash produced by a [`PasswordHasher`]
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub roles: Vec<String>,
}

impl Principal {
    /// Check if the principal holds a role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Principal to be persisted by [`CredentialStore::save`]
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

/// A role known to the role store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i32,
    pub name: String,
}

// ============================================================================
// Token Records
// ============================================================================

/// Persisted refresh token.
///
/// Only the SHA-256 digest of the opaque token is stored; the token string
/// itself leaves the service once, in the login or refresh response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub principal_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// A record is valid only while `now < expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Persisted revocation of an access token, kept until the token's own expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedTokenRecord {
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}

// ============================================================================
// Store Traits
// ============================================================================

/// Lookup and persistence of principals
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a principal, with its role names, by username
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>>;

    /// Find a principal by id
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>>;

    /// Check whether a username is already registered
    async fn exists_by_username(&self, username: &str) -> Result<bool>;

    /// Persist a new principal. Fails with [`StoreError::Conflict`] on a duplicate username.
    async fn save(&self, principal: NewPrincipal) -> Result<Principal>;
}

/// Lookup of roles by name
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>>;
}

/// Persistence of refresh token records, keyed by token digest
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Store a new record
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()>;

    /// Point lookup by digest
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Atomically remove and return a record.
    ///
    /// Of any number of concurrent callers presenting the same digest, at most
    /// one receives `Some`.
    async fn take(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Remove every record bound to a principal, returning the number removed
    async fn delete_all_for_principal(&self, principal_id: PrincipalId) -> Result<u64>;

    /// Number of records bound to a principal
    async fn count_for_principal(&self, principal_id: PrincipalId) -> Result<u64>;

    /// Remove records with `expires_at < now`, returning the number removed
    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Persistence of revoked access tokens, keyed by token digest
#[async_trait]
pub trait RevokedTokenRepository: Send + Sync {
    /// Insert a revocation. Revoking an already revoked token is a no-op.
    async fn revoke(&self, record: RevokedTokenRecord) -> Result<()>;

    /// Point lookup by digest
    async fn is_revoked(&self, token_hash: &str) -> Result<bool>;

    /// Remove records with `expires_at < now`, returning the number removed
    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Connectivity probe used by readiness checks
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// A backend providing every store the authentication service needs
pub trait AuthBackend:
    CredentialStore + RoleStore + RefreshTokenRepository + RevokedTokenRepository + StoreHealth
{
}

impl<T> AuthBackend for T where
    T: CredentialStore + RoleStore + RefreshTokenRepository + RevokedTokenRepository + StoreHealth
{
}

// ============================================================================
// Password Hashing
// ============================================================================

/// One-way password hashing capability
pub trait PasswordHasher: Send + Sync {
    /// Hash a raw password
    fn hash(&self, raw: &str) -> Result<String>;

    /// Check a raw password against a stored hash. Malformed hashes never match.
    fn matches(&self, raw: &str, hash: &str) -> bool;
}
