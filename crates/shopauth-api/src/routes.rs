//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::middleware::require_auth;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create `/api/auth` routes
pub fn auth_routes() -> Router<Arc<AppState>> {
    // Open to anonymous callers; logout works with or without an identity
    let public_routes = Router::new()
        .route("/register", post(auth::register_handler))
        .route("/login", post(auth::login_handler))
        .route("/refreshtoken", post(auth::refresh_handler))
        .route("/logout", post(auth::logout_handler));

    let protected_routes = Router::new()
        .route("/me", get(auth::me_handler))
        .route_layer(middleware::from_fn(require_auth));

    Router::new().merge(public_routes).merge(protected_routes)
}
