//! PostgreSQL store backend
//!
//! Provides principals, roles and both token tables using SQLx and PostgreSQL.
//! Token tables are keyed by the SHA-256 digest of the token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;

use crate::{
    CredentialStore, NewPrincipal, Principal, PrincipalId, RefreshTokenRecord,
    RefreshTokenRepository, Result, RevokedTokenRecord, RevokedTokenRepository, Role, RoleStore,
    StoreError, StoreHealth, ROLE_ADMIN, ROLE_USER,
};

/// Schema statements, applied in order by [`PgStore::migrate`]
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id SERIAL PRIMARY KEY,
        name VARCHAR(32) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(64) NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_roles (
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id BIGSERIAL PRIMARY KEY,
        token_hash TEXT NOT NULL UNIQUE,
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user_id ON refresh_tokens (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires_at ON refresh_tokens (expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS revoked_tokens (
        token_hash TEXT PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expires_at ON revoked_tokens (expires_at)",
];

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store connection
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing and seed the built-in roles
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        }

        for role in [ROLE_USER, ROLE_ADMIN] {
            sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
                .bind(role)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(format!("Failed to seed roles: {e}")))?;
        }

        tracing::info!("Database schema is up to date");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Principal row with aggregated role names
#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: i64,
    username: String,
    password_hash: String,
    roles: Vec<String>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Principal {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            roles: row.roles,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: i32,
    name: String,
}

#[derive(Debug, FromRow)]
struct RefreshTokenRow {
    token_hash: String,
    user_id: i64,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        RefreshTokenRecord {
            token_hash: row.token_hash,
            principal_id: row.user_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

const SELECT_PRINCIPAL: &str = r#"
    SELECT
        u.id, u.username, u.password_hash,
        COALESCE(array_agg(r.name) FILTER (WHERE r.name IS NOT NULL), '{}')::TEXT[] AS roles
    FROM users u
    LEFT JOIN user_roles ur ON ur.user_id = u.id
    LEFT JOIN roles r ON r.id = ur.role_id
"#;

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>> {
        let row: Option<PrincipalRow> = sqlx::query_as(&format!(
            "{SELECT_PRINCIPAL} WHERE u.username = $1 GROUP BY u.id"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to get user: {e}")))?;

        Ok(row.map(Principal::from))
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>> {
        let row: Option<PrincipalRow> =
            sqlx::query_as(&format!("{SELECT_PRINCIPAL} WHERE u.id = $1 GROUP BY u.id"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(format!("Failed to get user: {e}")))?;

        Ok(row.map(Principal::from))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(format!("Failed to check user: {e}")))?;

        Ok(row.0)
    }

    async fn save(&self, principal: NewPrincipal) -> Result<Principal> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to begin transaction: {e}")))?;

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO users (username, password_hash) VALUES ($1, $2) RETURNING id",
        )
        .bind(&principal.username)
        .bind(&principal.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("username '{}' already exists", principal.username))
            } else {
                StoreError::DatabaseError(format!("Failed to create user: {e}"))
            }
        })?;

        for role in &principal.roles {
            let result = sqlx::query(
                r#"
                INSERT INTO user_roles (user_id, role_id)
                SELECT $1, id FROM roles WHERE name = $2
                "#,
            )
            .bind(row.0)
            .bind(role)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to assign role: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(StoreError::NotFound(format!("role '{role}'")));
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to commit user: {e}")))?;

        Ok(Principal {
            id: row.0,
            username: principal.username,
            password_hash: principal.password_hash,
            roles: principal.roles,
        })
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row: Option<RoleRow> = sqlx::query_as("SELECT id, name FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Failed to get role: {e}")))?;

        Ok(row.map(|r| Role {
            id: r.id,
            name: r.name,
        }))
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn insert(&self, record: RefreshTokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token_hash, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.principal_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("refresh token already exists".to_string())
            } else {
                StoreError::DatabaseError(format!("Failed to store refresh token: {e}"))
            }
        })?;

        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            r#"
            SELECT token_hash, user_id, expires_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to get refresh token: {e}")))?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn take(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row: Option<RefreshTokenRow> = sqlx::query_as(
            r#"
            DELETE FROM refresh_tokens
            WHERE token_hash = $1
            RETURNING token_hash, user_id, expires_at, created_at
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to claim refresh token: {e}")))?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn delete_all_for_principal(&self, principal_id: PrincipalId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(principal_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::DatabaseError(format!("Failed to delete refresh tokens: {e}"))
            })?;

        Ok(result.rows_affected())
    }

    async fn count_for_principal(&self, principal_id: PrincipalId) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = $1")
            .bind(principal_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                StoreError::DatabaseError(format!("Failed to count refresh tokens: {e}"))
            })?;

        Ok(row.0 as u64)
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::DatabaseError(format!("Failed to prune refresh tokens: {e}"))
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevokedTokenRepository for PgStore {
    async fn revoke(&self, record: RevokedTokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, expires_at, revoked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (token_hash) DO NOTHING
            "#,
        )
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Failed to revoke token: {e}")))?;

        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE token_hash = $1)")
                .bind(token_hash)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    StoreError::DatabaseError(format!("Failed to check revocation: {e}"))
                })?;

        Ok(row.0)
    }

    async fn delete_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                StoreError::DatabaseError(format!("Failed to prune revoked tokens: {e}"))
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl StoreHealth for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Ping failed: {e}")))?;
        Ok(())
    }
}
