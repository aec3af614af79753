//! shopauth configuration management
//!
//! Handles configuration from environment variables and TOML files
//! with defaults suitable for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Signing key used when `JWT_SECRET` is not set. Never acceptable in production.
pub const DEV_JWT_SECRET: &str = "dev-secret-key-change-in-production-0123456789abcdef";

/// Upper bound for either token lifetime (10 years)
pub const MAX_TOKEN_TTL_MS: u64 = 315_360_000_000;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Token issuance settings
    pub auth: AuthConfig,

    /// Scheduled pruning of token tables
    pub cleanup: CleanupConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = std::env::var("API_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("API_PORT") {
            config.server.port = parse_env("API_PORT", port)?;
        }
        if let Ok(origins) = std::env::var("CORS_ORIGINS") {
            config.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PostgreSQL
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database.postgres_url = Some(url);
            }
        }
        if let Ok(size) = std::env::var("DATABASE_POOL_SIZE") {
            config.database.postgres_pool_size = parse_env("DATABASE_POOL_SIZE", size)?;
        }

        // Tokens
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(ttl) = std::env::var("JWT_ACCESS_EXPIRATION_MS") {
            config.auth.access_token_ttl_ms = parse_env("JWT_ACCESS_EXPIRATION_MS", ttl)?;
        }
        if let Ok(ttl) = std::env::var("JWT_REFRESH_EXPIRATION_MS") {
            config.auth.refresh_token_ttl_ms = parse_env("JWT_REFRESH_EXPIRATION_MS", ttl)?;
        }
        if let Ok(role) = std::env::var("AUTH_DEFAULT_ROLE") {
            config.auth.default_role = role;
        }
        if let Ok(secure) = std::env::var("AUTH_SECURE_COOKIE") {
            config.auth.secure_cookie = parse_bool("AUTH_SECURE_COOKIE", secure)?;
        }

        // Cleanup
        if let Ok(enabled) = std::env::var("CLEANUP_ENABLED") {
            config.cleanup.enabled = parse_bool("CLEANUP_ENABLED", enabled)?;
        }
        if let Ok(cron) = std::env::var("CLEANUP_REFRESH_TOKENS_CRON") {
            config.cleanup.refresh_token_cron = cron;
        }
        if let Ok(cron) = std::env::var("CLEANUP_REVOKED_TOKENS_CRON") {
            config.cleanup.revoked_token_cron = cron;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Only override if env values differ from defaults
        if env_config.server.host != ServerConfig::default().host {
            self.server.host = env_config.server.host;
        }
        if env_config.server.port != ServerConfig::default().port {
            self.server.port = env_config.server.port;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }

        // Always use env for sensitive values
        if env_config.database.postgres_url.is_some() {
            self.database.postgres_url = env_config.database.postgres_url;
        }
        if env_config.auth.jwt_secret != AuthConfig::default().jwt_secret {
            self.auth.jwt_secret = env_config.auth.jwt_secret;
        }

        Ok(self)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET".to_string()));
        }
        for (key, ttl_ms) in [
            ("JWT_ACCESS_EXPIRATION_MS", self.auth.access_token_ttl_ms),
            ("JWT_REFRESH_EXPIRATION_MS", self.auth.refresh_token_ttl_ms),
        ] {
            if ttl_ms == 0 || ttl_ms > MAX_TOKEN_TTL_MS {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: ttl_ms.to_string(),
                });
            }
        }
        if self.auth.default_role.trim().is_empty() {
            return Err(ConfigError::MissingRequired("AUTH_DEFAULT_ROLE".to_string()));
        }
        if self.cleanup.enabled {
            if self.cleanup.refresh_token_cron.trim().is_empty() {
                return Err(ConfigError::MissingRequired(
                    "CLEANUP_REFRESH_TOKENS_CRON".to_string(),
                ));
            }
            if self.cleanup.revoked_token_cron.trim().is_empty() {
                return Err(ConfigError::MissingRequired(
                    "CLEANUP_REVOKED_TOKENS_CRON".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub postgres_url: Option<String>,

    /// PostgreSQL connection pool size
    pub postgres_pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            postgres_pool_size: 10,
        }
    }
}

/// Token issuance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for access tokens
    pub jwt_secret: String,

    /// Access token lifetime in milliseconds
    pub access_token_ttl_ms: u64,

    /// Refresh token lifetime in milliseconds
    pub refresh_token_ttl_ms: u64,

    /// Role attached to newly registered principals
    pub default_role: String,

    /// Name of the cookie carrying the refresh token
    pub refresh_cookie_name: String,

    /// Path scope of the refresh cookie
    pub refresh_cookie_path: String,

    /// Mark the refresh cookie `Secure`
    pub secure_cookie: bool,
}

impl AuthConfig {
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        ttl_from_ms(self.access_token_ttl_ms)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        ttl_from_ms(self.refresh_token_ttl_ms)
    }
}

fn ttl_from_ms(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_token_ttl_ms: 3_600_000,      // 1 hour
            refresh_token_ttl_ms: 604_800_000,   // 7 days
            default_role: crate::ROLE_USER.to_string(),
            refresh_cookie_name: "refreshtoken".to_string(),
            refresh_cookie_path: "/api/auth/refreshtoken".to_string(),
            secure_cookie: true,
        }
    }
}

/// Cleanup scheduler configuration.
///
/// Schedules use the six-field cron format with a leading seconds column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Run the scheduler inside the API server
    pub enabled: bool,

    /// Schedule for pruning expired refresh tokens
    pub refresh_token_cron: String,

    /// Schedule for pruning expired revocations
    pub revoked_token_cron: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_token_cron: "0 0 0 * * *".to_string(),
            revoked_token_cron: "0 30 0 * * *".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
