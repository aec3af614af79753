//! ShopAuth CLI - operator commands
//!
//! Usage:
//!   shopauth migrate
//!   shopauth cleanup [--refresh-only | --revoked-only]
//!   shopauth inspect-token <token>

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use shopauth_api::auth::{
    AccessTokenCodec, CleanupScheduler, RefreshTokenStore, RevocationRegistry, TokenError,
};
use shopauth_core::{AppConfig, PgStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shopauth")]
#[command(about = "ShopAuth operator CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and seed the built-in roles
    Migrate,
    /// Delete expired refresh tokens and revocations once
    Cleanup {
        /// Only prune refresh tokens
        #[arg(long, conflicts_with = "revoked_only")]
        refresh_only: bool,
        /// Only prune revoked access tokens
        #[arg(long)]
        revoked_only: bool,
    },
    /// Verify an access token and print its claims
    InspectToken {
        /// The bearer token, without the `Bearer ` prefix
        token: String,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn connect(config: &AppConfig) -> anyhow::Result<Arc<PgStore>> {
    let Some(url) = config.database.postgres_url.as_deref() else {
        bail!("DATABASE_URL is required for this command");
    };
    let store = PgStore::connect(url, config.database.postgres_pool_size)
        .await
        .context("failed to connect to PostgreSQL")?;
    tracing::debug!(pool_size = config.database.postgres_pool_size, "Connected to PostgreSQL");
    Ok(Arc::new(store))
}

async fn cleanup(config: &AppConfig, refresh_only: bool, revoked_only: bool) -> anyhow::Result<()> {
    let store = connect(config).await?;
    let scheduler = CleanupScheduler::new(
        RefreshTokenStore::new(store.clone(), config.auth.refresh_token_ttl()),
        RevocationRegistry::new(store),
        config.cleanup.clone(),
    );

    if !revoked_only {
        let removed = scheduler.prune_refresh_tokens().await?;
        println!("Expired refresh tokens removed: {removed}");
    }
    if !refresh_only {
        let removed = scheduler.prune_revoked_tokens().await?;
        println!("Expired revoked tokens removed: {removed}");
    }
    Ok(())
}

fn inspect_token(config: &AppConfig, token: &str) -> anyhow::Result<()> {
    let codec = AccessTokenCodec::from_config(&config.auth)?;

    match codec.verify_claims(token) {
        Ok(claims) => {
            let remaining = claims.exp - Utc::now().timestamp();
            println!("{}", serde_json::to_string_pretty(&claims)?);
            println!("Valid, expires in {remaining}s");
        }
        Err(TokenError::Expired) => {
            let expired_at = codec.expiration_of(token)?;
            println!("Expired at {}", expired_at.to_rfc3339());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Token rejected");
            bail!("Token rejected: {e}")
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shopauth=info,shopauth_api=info,shopauth_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await.context("failed to apply schema")?;
            tracing::info!("Schema migration applied");
            println!("Schema is up to date");
        }
        Commands::Cleanup {
            refresh_only,
            revoked_only,
        } => cleanup(&config, refresh_only, revoked_only).await?,
        Commands::InspectToken { token } => inspect_token(&config, &token)?,
    }

    Ok(())
}
