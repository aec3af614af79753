//! ShopAuth API - authentication REST server
//!
//! Issues short-lived access tokens and rotating refresh tokens, revokes
//! access tokens at logout and authenticates every request from its bearer
//! token.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::auth::login_handler,
        handlers::auth::register_handler,
        handlers::auth::refresh_handler,
        handlers::auth::logout_handler,
        handlers::auth::me_handler,
    ),
    components(
        schemas(
            handlers::health::HealthResponse,
            handlers::health::ReadinessResponse,
            handlers::health::ReadinessChecks,
            handlers::auth::JwtResponse,
            handlers::auth::TokenRefreshRequest,
            handlers::auth::TokenRefreshResponse,
            handlers::auth::LogoutRequest,
            handlers::auth::MessageResponse,
            auth::LoginRequest,
            auth::RegisterRequest,
            auth::AuthenticatedUser,
            error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "auth", description = "Login, registration, token refresh and logout"),
    ),
    info(
        title = "ShopAuth API",
        description = "Token-based authentication: JWT access tokens, rotating refresh tokens and logout revocation.",
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by protected operations
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    // Credentials let browsers send the refresh cookie cross-origin
    layer.allow_origin(allowed).allow_credentials(true)
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    let cors = cors_layer(&state.config.server.cors_origins);
    let authenticator = state.authenticator.clone();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .nest("/api/auth", routes::auth_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum_middleware::from_fn_with_state(
            authenticator,
            auth::authenticate,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_counter_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router over an in-memory store with a fast password hasher
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_router(Arc::new(testing::state()))
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! Fixtures for integration tests

    use super::*;
    use crate::auth::{Argon2PasswordHasher, PasswordConfig};
    use shopauth_core::{AppConfig, MemoryStore};

    pub fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.secure_cookie = false;
        config.cleanup.enabled = false;
        config
    }

    /// State over a fresh in-memory store
    pub fn state() -> AppState {
        state_with(config(), Arc::new(MemoryStore::new()))
    }

    pub fn state_with(config: AppConfig, store: Arc<MemoryStore>) -> AppState {
        let hasher = match Argon2PasswordHasher::new(&PasswordConfig::light()) {
            Ok(hasher) => hasher,
            Err(e) => panic!("light password config rejected: {e}"),
        };
        match AppState::new(config, store, Arc::new(hasher)) {
            Ok(state) => state,
            Err(e) => panic!("test state wiring failed: {e}"),
        }
    }
}
