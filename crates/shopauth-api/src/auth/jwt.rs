//! Access token codec
//!
//! Issues and verifies short-lived bearer tokens signed with HMAC-SHA512.
//! The codec is a pure function of its key, its TTL and the clock; it never
//! touches a store, so revocation is checked by the caller.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use shopauth_core::AuthConfig;
use thiserror::Error;
use uuid::Uuid;

const ALGORITHM: Algorithm = Algorithm::HS512;

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - username of the principal
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    /// Unique token id, so two tokens minted in the same second differ
    pub jti: String,
}

/// Access token failures
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token has expired")]
    Expired,

    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to encode token: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// Signs and verifies access tokens
#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for AccessTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenCodec")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl AccessTokenCodec {
    /// Create a codec from a symmetric key and access token lifetime
    pub fn new(secret: &str, ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::InvalidArgument("signing key is empty".to_string()));
        }
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidArgument(
                "access token TTL must be positive".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, TokenError> {
        Self::new(&config.jwt_secret, config.access_token_ttl())
    }

    /// Access token lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `subject`, valid from now for the configured TTL
    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, Utc::now())
    }

    /// Issue a token as if minted at `issued_at`
    pub fn issue_at(&self, subject: &str, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        if subject.is_empty() {
            return Err(TokenError::InvalidArgument("subject is empty".to_string()));
        }

        let expires_at = issued_at.checked_add_signed(self.ttl).ok_or_else(|| {
            TokenError::InvalidArgument(format!("access token TTL out of range: {}", self.ttl))
        })?;

        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)?)
    }

    /// Verify signature and expiry, returning the subject.
    ///
    /// Revocation is not consulted here.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        Ok(self.decode_claims(token, true)?.sub)
    }

    /// Verify signature and expiry, returning all claims
    pub fn verify_claims(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_claims(token, true)
    }

    /// Extract the expiry of an authentic token without applying freshness checks
    pub fn expiration_of(&self, token: &str) -> Result<DateTime<Utc>, TokenError> {
        let claims = self.decode_claims(token, false)?;
        DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Malformed(format!("exp out of range: {}", claims.exp)))
    }

    fn decode_claims(&self, token: &str, check_expiry: bool) -> Result<Claims, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::InvalidArgument("token is empty".to_string()));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::UnsupportedAlgorithm
                }
                ErrorKind::InvalidSignature => {
                    TokenError::Malformed("signature mismatch".to_string())
                }
                _ => TokenError::Malformed(e.to_string()),
            })
    }
}
