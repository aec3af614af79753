//! HTTP middleware shared by all routes
//!
//! Author: hephaex@gmail.com

pub mod security_headers;

pub use security_headers::security_headers_middleware;

use axum::{extract::{Request, State}, middleware::Next, response::Response};
use std::sync::Arc;

use crate::state::AppState;

/// Count every request served, for the health endpoint
pub async fn request_counter_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    state.increment_requests();
    next.run(request).await
}
