//! Response hardening for the token endpoints
//!
//! Every response gets `nosniff`, frame denial, HSTS and `no-referrer`.
//! JSON API responses under `/api` additionally get a deny-all CSP. A response
//! that may carry credentials, meaning anything under `/api/auth` or anything
//! setting a cookie, is marked `no-store` so no cache keeps a token.
//!
//! Author: hephaex@gmail.com

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

const API_PREFIX: &str = "/api/";
const AUTH_PREFIX: &str = "/api/auth";

const BASELINE: [(HeaderName, &str); 4] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::REFERRER_POLICY, "no-referrer"),
];

const API_CSP: &str = "default-src 'none'; frame-ancestors 'none'";

/// Whether a response may hold an access token, refresh token or session cookie
fn carries_credentials(path: &str, response_headers: &HeaderMap) -> bool {
    let under_auth = path
        .strip_prefix(AUTH_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'));
    under_auth || response_headers.contains_key(header::SET_COOKIE)
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    let no_store = carries_credentials(&path, response.headers());
    let headers = response.headers_mut();

    for (name, value) in BASELINE {
        headers.insert(name, HeaderValue::from_static(value));
    }

    // Swagger UI stays outside the deny-all policy
    if path.starts_with(API_PREFIX) {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(API_CSP),
        );
    }

    if no_store {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    }

    response
}
