//! API Integration Tests
//!
//! Drive the full router over the in-memory store.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use shopauth_api::{create_router, create_router_for_testing, state::AppState, testing};
use shopauth_core::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().unwrap());
    request
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// `name=value` part of the Set-Cookie header
fn set_cookie(response: &Response) -> String {
    let header = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("Set-Cookie missing")
        .to_str()
        .unwrap();
    header.split(';').next().unwrap().to_string()
}

fn test_app() -> (Router, Arc<AppState>) {
    let state = Arc::new(testing::state());
    (create_router(state.clone()), state)
}

async fn register(app: &Router, username: &str, password: &str) -> Response {
    app.clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/register",
            Some(json!({"username": username, "password": password})),
        ))
        .await
        .unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> Response {
    app.clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/login",
            Some(json!({"username": username, "password": password})),
        ))
        .await
        .unwrap()
}

async fn refresh(app: &Router, refresh_token: &str) -> Response {
    app.clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/refreshtoken",
            Some(json!({"refreshToken": refresh_token})),
        ))
        .await
        .unwrap()
}

async fn me(app: &Router, access_token: &str) -> Response {
    app.clone()
        .oneshot(with_bearer(
            Request::builder()
                .uri("/api/auth/me")
                .body(Body::empty())
                .unwrap(),
            access_token,
        ))
        .await
        .unwrap()
}

/// Register and log in, returning the login body
async fn signed_in(app: &Router, username: &str) -> Value {
    assert_eq!(register(app, username, "correct").await.status(), StatusCode::OK);
    let response = login(app, username, "correct").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

fn token(body: &Value, field: &str) -> String {
    body[field].as_str().unwrap().to_string()
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_check() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"]["store"], true);
}

#[tokio::test]
async fn test_openapi_document() {
    let app = create_router_for_testing();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["paths"]["/api/auth/login"].is_object());
    assert!(json["paths"]["/api/auth/refreshtoken"].is_object());
    assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
}

// =============================================================================
// Registration Tests
// =============================================================================

#[tokio::test]
async fn test_register_twice_rejects_duplicate_username() {
    let (app, _) = test_app();

    let response = register(&app, "bob", "secret1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["message"],
        "User registered successfully!"
    );

    let response = register(&app, "bob", "secret2").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Error: username already in use");
    assert_eq!(json["path"], "/api/auth/register");
}

#[tokio::test]
async fn test_register_validation() {
    let (app, _) = test_app();

    let response = register(&app, "ab", "secret1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = register(&app, "carol", "12345").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(create_json_request(
            "POST",
            "/api/auth/register",
            Some(json!({"username": "carol"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_without_default_role() {
    let state = Arc::new(testing::state_with(
        testing::config(),
        Arc::new(MemoryStore::with_roles(&[])),
    ));
    let app = create_router(state);

    let response = register(&app, "dave", "secret1").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Internal server error");
}

// =============================================================================
// Login Tests
// =============================================================================

#[tokio::test]
async fn test_login_success() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;

    let response = login(&app, "alice", "correct").await;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = set_cookie(&response);
    let json = body_json(response).await;

    assert!(json["accessToken"].is_string());
    assert!(json["refreshToken"].is_string());
    assert_eq!(json["tokenType"], "Bearer");
    assert_eq!(json["username"], "alice");
    assert!(json["roles"]
        .as_array()
        .unwrap()
        .contains(&json!("ROLE_USER")));
    assert_eq!(cookie, format!("refreshtoken={}", token(&json, "refreshToken")));
}

#[tokio::test]
async fn test_login_cookie_attributes() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;

    let response = login(&app, "alice", "correct").await;
    let headers: Vec<_> = response.headers().get_all(header::SET_COOKIE).iter().collect();
    assert_eq!(headers.len(), 1);

    let cookie = headers[0].to_str().unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Path=/api/auth/refreshtoken"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn test_login_wrong_password() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;

    let response = login(&app, "alice", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let json = body_json(response).await;
    assert_eq!(json["status"], 401);
    assert_eq!(json["error"], "Unauthorized");
}

#[tokio::test]
async fn test_login_unknown_user_matches_wrong_password() {
    let (app, _) = test_app();

    let response = login(&app, "nobody", "whatever").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["message"],
        "Invalid username or password."
    );
}

#[tokio::test]
async fn test_auth_responses_are_not_cached() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;

    let response = login(&app, "alice", "correct").await;
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
}

// =============================================================================
// Refresh Tests
// =============================================================================

#[tokio::test]
async fn test_refresh_rotates_both_tokens() {
    let (app, _) = test_app();
    let session = signed_in(&app, "alice").await;
    let old_refresh = token(&session, "refreshToken");
    let old_access = token(&session, "accessToken");

    let response = refresh(&app, &old_refresh).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    assert_ne!(token(&json, "accessToken"), old_access);
    assert_ne!(token(&json, "refreshToken"), old_refresh);
    assert_eq!(json["tokenType"], "Bearer");

    let response = refresh(&app, &old_refresh).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["message"],
        "Refresh token is not in database"
    );
}

#[tokio::test]
async fn test_refresh_expired_token_is_removed() {
    let mut config = testing::config();
    config.auth.refresh_token_ttl_ms = 1;
    let app = create_router(Arc::new(testing::state_with(
        config,
        Arc::new(MemoryStore::new()),
    )));
    let session = signed_in(&app, "alice").await;
    let refresh_token = token(&session, "refreshToken");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let response = refresh(&app, &refresh_token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["message"],
        "Refresh token was expired. Please make a new signin request"
    );

    let response = refresh(&app, &refresh_token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["message"],
        "Refresh token is not in database"
    );
}

#[tokio::test]
async fn test_refresh_unknown_token() {
    let (app, _) = test_app();

    let response = refresh(&app, "not-a-real-token").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_refresh_from_cookie() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;
    let response = login(&app, "alice", "correct").await;
    let cookie = set_cookie(&response);

    let response = app
        .clone()
        .oneshot(with_cookie(
            Request::builder()
                .method("POST")
                .uri("/api/auth/refreshtoken")
                .body(Body::empty())
                .unwrap(),
            &cookie,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let rotated = set_cookie(&response);
    let json = body_json(response).await;
    assert_ne!(rotated, cookie);
    assert_eq!(rotated, format!("refreshtoken={}", token(&json, "refreshToken")));
}

#[tokio::test]
async fn test_refresh_without_token() {
    let (app, _) = test_app();

    let response = app
        .oneshot(create_json_request("POST", "/api/auth/refreshtoken", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_keeps_sessions_but_refresh_collapses_them() {
    let (app, state) = test_app();
    let first = signed_in(&app, "alice").await;
    let second = body_json(login(&app, "alice", "correct").await).await;
    let user_id = first["id"].as_i64().unwrap();

    assert_eq!(
        state.auth.refresh_tokens().count_for_principal(user_id).await.unwrap(),
        2
    );

    let response = refresh(&app, &token(&first, "refreshToken")).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        state.auth.refresh_tokens().count_for_principal(user_id).await.unwrap(),
        1
    );
    let response = refresh(&app, &token(&second, "refreshToken")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_single_winner() {
    let (app, _) = test_app();
    let session = signed_in(&app, "alice").await;
    let refresh_token = token(&session, "refreshToken");

    let (a, b) = tokio::join!(refresh(&app, &refresh_token), refresh(&app, &refresh_token));
    let mut statuses = [a.status(), b.status()];
    statuses.sort();

    assert_eq!(statuses, [StatusCode::OK, StatusCode::FORBIDDEN]);
}

// =============================================================================
// Authentication and Logout Tests
// =============================================================================

#[tokio::test]
async fn test_me_requires_authentication() {
    let (app, _) = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["path"], "/api/auth/me");

    let response = me(&app, "garbage.token.value").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_identity() {
    let (app, _) = test_app();
    let session = signed_in(&app, "alice").await;

    let response = me(&app, &token(&session, "accessToken")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["username"], "alice");
    assert_eq!(json["id"], session["id"]);
}

#[tokio::test]
async fn test_logout_revokes_access_token() {
    let (app, state) = test_app();
    let session = signed_in(&app, "alice").await;
    let access_token = token(&session, "accessToken");

    let response = app
        .clone()
        .oneshot(with_bearer(
            create_json_request("POST", "/api/auth/logout", None),
            &access_token,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookie(&response).starts_with("refreshtoken="));
    assert_eq!(body_json(response).await["message"], "Log out successful!");

    assert!(state
        .auth
        .revocations()
        .is_revoked(&access_token)
        .await
        .unwrap());

    let response = me(&app, &access_token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Without the refresh token the session can still be renewed
    let response = refresh(&app, &token(&session, "refreshToken")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_logout_with_cookie_only() {
    let (app, _) = test_app();
    register(&app, "alice", "correct").await;
    let response = login(&app, "alice", "correct").await;
    let cookie = set_cookie(&response);
    let refresh_token = token(&body_json(response).await, "refreshToken");

    let response = app
        .clone()
        .oneshot(with_cookie(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .body(Body::empty())
                .unwrap(),
            &cookie,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cleared.starts_with("refreshtoken=;"));
    assert!(cleared.contains("Max-Age=0"));
    assert!(cleared.contains("Path=/api/auth/refreshtoken"));

    let response = refresh(&app, &refresh_token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_logout_anonymous_succeeds() {
    let (app, _) = test_app();

    let response = app
        .oneshot(create_json_request("POST", "/api/auth/logout", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
