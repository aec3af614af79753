//! Authentication service layer
//!
//! Orchestrates login, registration, token refresh and logout on top of the
//! credential and role stores, the access token codec, the refresh token
//! store and the revocation registry.
//!
//! Refresh token states: issued, then valid, expired or rotated away, then deleted.
//! Login keeps the principal's other sessions; refresh collapses them to one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shopauth_core::{
    AuthConfig, CredentialStore, NewPrincipal, PasswordHasher, Principal, RoleStore, StoreError,
};
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use validator::Validate;

use super::digest::log_fingerprint;
use super::jwt::{AccessTokenCodec, TokenError};
use super::refresh::{RefreshTokenError, RefreshTokenStore};
use super::revocation::{verifying_until, RevocationRegistry};

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 20, message = "username must be 3 to 20 characters"))]
    pub username: String,
    #[validate(length(min = 6, max = 40, message = "password must be 6 to 40 characters"))]
    pub password: String,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "username must not be blank"))]
    pub username: String,
    #[validate(length(min = 1, message = "password must not be blank"))]
    pub password: String,
}

/// Authentication failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Error: username already in use")]
    UsernameTaken(String),

    #[error("Role is not found: {0}")]
    RoleMissing(String),

    #[error("Refresh token is not in database")]
    RefreshTokenNotFound,

    #[error("Refresh token was expired. Please make a new signin request")]
    RefreshTokenExpired,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RefreshTokenError> for AuthError {
    fn from(err: RefreshTokenError) -> Self {
        match err {
            RefreshTokenError::Expired => AuthError::RefreshTokenExpired,
            RefreshTokenError::Store(e) => AuthError::Store(e),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub access_token: String,
    pub refresh_token: String,
    pub principal: Principal,
}

/// Result of a successful refresh
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// What a logout actually did. Logout itself never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutSummary {
    pub access_token_revoked: bool,
    pub refresh_tokens_deleted: u64,
}

/// Authentication service
pub struct AuthenticationService {
    credentials: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleStore>,
    hasher: Arc<dyn PasswordHasher>,
    codec: AccessTokenCodec,
    refresh_tokens: RefreshTokenStore,
    revocations: RevocationRegistry,
    default_role: String,
}

impl AuthenticationService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        roles: Arc<dyn RoleStore>,
        hasher: Arc<dyn PasswordHasher>,
        codec: AccessTokenCodec,
        refresh_tokens: RefreshTokenStore,
        revocations: RevocationRegistry,
        config: &AuthConfig,
    ) -> Self {
        Self {
            credentials,
            roles,
            hasher,
            codec,
            refresh_tokens,
            revocations,
            default_role: config.default_role.clone(),
        }
    }

    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    pub fn revocations(&self) -> &RevocationRegistry {
        &self.revocations
    }

    /// Authenticate with username and password.
    ///
    /// A new refresh token is added alongside any the principal already holds.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AuthError> {
        request.validate()?;

        let principal = self
            .credentials
            .find_by_username(&request.username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let matches = {
            let hasher = self.hasher.clone();
            let hash = principal.password_hash.clone();
            tokio::task::spawn_blocking(move || hasher.matches(&request.password, &hash))
                .await
                .map_err(|e| AuthError::Internal(format!("password check aborted: {e}")))?
        };
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let access_token = self.codec.issue(&principal.username)?;
        let refresh = self.refresh_tokens.create(principal.id).await?;

        tracing::info!(
            principal_id = principal.id,
            username = %principal.username,
            "Login succeeded"
        );

        Ok(LoginOutcome {
            access_token,
            refresh_token: refresh.token,
            principal,
        })
    }

    /// Register a new principal with the default role
    pub async fn register(&self, request: RegisterRequest) -> Result<Principal, AuthError> {
        request.validate()?;

        if self.credentials.exists_by_username(&request.username).await? {
            return Err(AuthError::UsernameTaken(request.username));
        }

        let role = self
            .roles
            .find_by_name(&self.default_role)
            .await?
            .ok_or_else(|| AuthError::RoleMissing(self.default_role.clone()))?;

        let password_hash = {
            let hasher = self.hasher.clone();
            let raw = request.password;
            tokio::task::spawn_blocking(move || hasher.hash(&raw))
                .await
                .map_err(|e| AuthError::Internal(format!("password hashing aborted: {e}")))??
        };

        let principal = self
            .credentials
            .save(NewPrincipal {
                username: request.username.clone(),
                password_hash,
                roles: vec![role.name],
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::UsernameTaken(request.username.clone()),
                other => AuthError::Store(other),
            })?;

        tracing::info!(
            principal_id = principal.id,
            username = %principal.username,
            "Registered principal"
        );
        Ok(principal)
    }

    /// Exchange a refresh token for a new access token and a new refresh token.
    ///
    /// The presented token is consumed atomically; a concurrent refresh of the
    /// same token fails with [`AuthError::RefreshTokenNotFound`]. On success every
    /// other refresh token of the principal is deleted as well.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::Validation(
                "refreshToken must not be blank".to_string(),
            ));
        }

        let record = self
            .refresh_tokens
            .find_by_token(refresh_token)
            .await?
            .ok_or(AuthError::RefreshTokenNotFound)?;
        let record = self.refresh_tokens.verify_not_expired(record).await?;

        if self.refresh_tokens.claim(refresh_token).await?.is_none() {
            tracing::warn!(
                principal_id = record.principal_id,
                token = %log_fingerprint(refresh_token),
                "Refresh token consumed by a concurrent request"
            );
            return Err(AuthError::RefreshTokenNotFound);
        }

        let principal = match self.credentials.find_by_id(record.principal_id).await? {
            Some(principal) => principal,
            None => {
                tracing::warn!(
                    principal_id = record.principal_id,
                    "Refresh token bound to a missing principal"
                );
                self.refresh_tokens
                    .delete_all_for_principal(record.principal_id)
                    .await?;
                return Err(AuthError::RefreshTokenNotFound);
            }
        };

        let access_token = self.codec.issue(&principal.username)?;
        let removed = self
            .refresh_tokens
            .delete_all_for_principal(principal.id)
            .await?;
        let refresh = self.refresh_tokens.create(principal.id).await?;

        tracing::info!(
            principal_id = principal.id,
            other_sessions_removed = removed,
            "Rotated refresh token"
        );

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Best-effort logout.
    ///
    /// Revokes the presented access token until its own expiry, and deletes
    /// every refresh token of the principal owning the presented refresh token.
    /// Failures are logged and skipped.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> LogoutSummary {
        let mut summary = LogoutSummary::default();

        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            match self.codec.expiration_of(token) {
                Ok(expires_at) if verifying_until(expires_at) > Utc::now() => {
                    match self.revocations.revoke(token, expires_at).await {
                        Ok(()) => summary.access_token_revoked = true,
                        Err(e) => tracing::error!("Failed to revoke access token: {}", e),
                    }
                }
                Ok(_) => tracing::debug!("Access token already expired, nothing to revoke"),
                Err(e) => tracing::debug!("Skipping access token revocation: {}", e),
            }
        }

        if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
            match self.refresh_tokens.find_by_token(token).await {
                Ok(Some(record)) => {
                    match self
                        .refresh_tokens
                        .delete_all_for_principal(record.principal_id)
                        .await
                    {
                        Ok(count) => summary.refresh_tokens_deleted = count,
                        Err(e) => tracing::error!("Failed to delete refresh tokens: {}", e),
                    }
                }
                Ok(None) => tracing::debug!("Logout presented an unknown refresh token"),
                Err(e) => tracing::error!("Failed to look up refresh token: {}", e),
            }
        }

        tracing::info!(
            access_token_revoked = summary.access_token_revoked,
            refresh_tokens_deleted = summary.refresh_tokens_deleted,
            "Logout processed"
        );
        summary
    }
}
