//! ShopAuth API Server
//!
//! REST API server for login, registration, token refresh and logout.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use shopauth_api::{auth::Argon2PasswordHasher, create_router, state::AppState};
use shopauth_core::{config::LoggingConfig, AppConfig, MemoryStore, PgStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.level;
        format!("shopauth_api={level},shopauth_core={level},audit=info,tower_http=info").into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("SHOPAUTH_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let hasher = Arc::new(Argon2PasswordHasher::default());

    let state = match config.database.postgres_url.clone() {
        Some(url) => {
            let store = PgStore::connect(&url, config.database.postgres_pool_size)
                .await
                .context("failed to connect to PostgreSQL")?;
            store.migrate().await.context("failed to apply schema")?;
            tracing::info!("Using PostgreSQL store");
            AppState::new(config, Arc::new(store), hasher)?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, all data is lost on restart");
            AppState::new(config, Arc::new(MemoryStore::new()), hasher)?
        }
    };
    Ok(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    if config.auth.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set; using the development secret");
    }
    if config.auth.access_token_ttl_ms >= config.auth.refresh_token_ttl_ms {
        tracing::warn!(
            access_ms = config.auth.access_token_ttl_ms,
            refresh_ms = config.auth.refresh_token_ttl_ms,
            "Access tokens outlive refresh tokens"
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(build_state(config).await?);

    let cleanup = if state.config.cleanup.enabled {
        Some(state.cleanup_scheduler().start().await?)
    } else {
        tracing::info!("Token cleanup disabled");
        None
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("ShopAuth API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = cleanup {
        handle.shutdown().await;
    }
    tracing::info!("Server stopped");

    Ok(())
}
