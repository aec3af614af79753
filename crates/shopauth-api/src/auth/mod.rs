//! Authentication and token lifecycle
//!
//! - `jwt`: access token codec (HS512, no persistence)
//! - `refresh`: opaque refresh tokens and their records
//! - `revocation`: registry of access tokens revoked at logout
//! - `password`: Argon2id password hashing
//! - `service`: login, registration, refresh and logout
//! - `middleware`: per-request bearer token authentication and guards
//! - `cleanup`: scheduled pruning of both token tables

pub mod cleanup;
pub mod digest;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod refresh;
pub mod revocation;
pub mod service;

pub use cleanup::{CleanupError, CleanupHandle, CleanupReport, CleanupScheduler};
pub use jwt::{AccessTokenCodec, Claims, TokenError};
pub use middleware::{
    authenticate, bearer_token, require_auth, require_role, AuthenticatedUser, Authentication,
    Rejection, RequestAuthenticator,
};
pub use password::{Argon2PasswordHasher, PasswordConfig};
pub use refresh::{IssuedRefreshToken, RefreshTokenError, RefreshTokenStore};
pub use revocation::RevocationRegistry;
pub use service::{
    AuthError, AuthenticationService, LoginOutcome, LoginRequest, LogoutSummary, RegisterRequest,
    TokenPair,
};
